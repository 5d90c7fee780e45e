//! Business API message conversions.

use serde_json::{Map, Value, json};
use wagate_protocol::{CanonicalMessage, MessageType, OutboundBody, OutboundMessage};

use super::NormalizeError;
use crate::business::{IncomingMessage, WebhookEvent};

/// `object` value of webhook notifications that carry messages.
const WEBHOOK_OBJECT: &str = "whatsapp_business_account";

/// Convert a webhook message. Never fails; missing fields become empty and an
/// unparseable timestamp becomes 0.
pub fn business_to_canonical(native: &IncomingMessage) -> CanonicalMessage {
    let (message_type, content) = classify(native);
    CanonicalMessage {
        id: native.id.clone().unwrap_or_default(),
        from: native.from.clone().unwrap_or_default(),
        timestamp: native
            .timestamp
            .as_deref()
            .and_then(|t| t.trim().parse().ok())
            .unwrap_or_default(),
        message_type,
        content,
    }
}

fn classify(native: &IncomingMessage) -> (MessageType, String) {
    if let Some(text) = &native.text {
        return (MessageType::Text, text.body.clone());
    }
    let media = [
        (MessageType::Image, &native.image),
        (MessageType::Audio, &native.audio),
        (MessageType::Video, &native.video),
        (MessageType::Document, &native.document),
    ];
    for (message_type, slot) in media {
        if let Some(m) = slot {
            return (message_type, m.caption.clone().unwrap_or_default());
        }
    }
    (MessageType::Text, String::new())
}

/// Collect every inbound message of a webhook notification, in delivery order.
///
/// Notifications for other objects and non-`messages` fields are skipped.
pub fn extract_webhook_messages(event: &WebhookEvent) -> Vec<CanonicalMessage> {
    if event.object != WEBHOOK_OBJECT {
        return Vec::new();
    }
    event
        .entry
        .iter()
        .flat_map(|entry| &entry.changes)
        .filter(|change| change.field == "messages")
        .filter_map(|change| change.value.messages.as_ref())
        .flatten()
        .map(business_to_canonical)
        .collect()
}

/// Build the JSON body for `POST /{phone_number_id}/messages`.
pub fn to_business_payload(outbound: &OutboundMessage) -> Result<Value, NormalizeError> {
    let kind = outbound.kind();
    let mut payload = json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": outbound.to,
        "type": kind,
    });

    match &outbound.body {
        OutboundBody::Text(body) => {
            payload["text"] = json!({ "body": body });
        }
        OutboundBody::Template(template) => {
            payload["template"] = json!({
                "name": template.name,
                "language": { "code": template.language.code },
                "components": template.components,
            });
        }
        OutboundBody::Media {
            kind: _,
            id,
            link,
            caption,
        } => {
            if id.is_none() && link.is_none() {
                return Err(NormalizeError::Invalid {
                    kind,
                    reason: "either a media id or a link is required".to_string(),
                });
            }
            let mut media = Map::new();
            if let Some(id) = id {
                media.insert("id".to_string(), json!(id));
            }
            if let Some(link) = link {
                media.insert("link".to_string(), json!(link));
            }
            if let Some(caption) = caption {
                media.insert("caption".to_string(), json!(caption));
            }
            payload[kind] = Value::Object(media);
        }
        OutboundBody::Location(location) => {
            payload["location"] = json!(location);
        }
        OutboundBody::Reaction { message_id, emoji } => {
            payload["reaction"] = json!({
                "message_id": message_id,
                "emoji": emoji,
            });
        }
    }

    Ok(payload)
}

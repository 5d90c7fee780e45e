//! Device-linked message shapes and conversions.
//!
//! The shapes mirror what the device protocol reports for a message: a `key`
//! identifying the chat and message, a timestamp, and a `message` object in
//! which exactly one content variant is normally populated. All fields are
//! optional so that a partially populated message never fails to decode.

use serde::{Deserialize, Deserializer, Serialize};
use wagate_protocol::{CanonicalMessage, MessageType, OutboundBody, OutboundMessage, TransportKind};

use super::NormalizeError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedMessage {
    #[serde(default)]
    pub key: MessageKey,
    #[serde(default, deserialize_with = "de_timestamp")]
    pub message_timestamp: Option<i64>,
    #[serde(default)]
    pub message: Option<LinkedContent>,
    #[serde(default)]
    pub push_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageKey {
    #[serde(default)]
    pub remote_jid: Option<String>,
    #[serde(default)]
    pub from_me: bool,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub participant: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedContent {
    #[serde(default)]
    pub conversation: Option<String>,
    #[serde(default)]
    pub extended_text_message: Option<ExtendedText>,
    #[serde(default)]
    pub image_message: Option<LinkedMedia>,
    #[serde(default)]
    pub audio_message: Option<LinkedMedia>,
    #[serde(default)]
    pub video_message: Option<LinkedMedia>,
    #[serde(default)]
    pub document_message: Option<LinkedMedia>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtendedText {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedMedia {
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub mimetype: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
}

/// Send envelope for the device-linked transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedOutbound {
    pub text: String,
}

/// Timestamps arrive as numbers or as decimal strings.
fn de_timestamp<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Str(String),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Int(n)) => Some(n),
        Some(Raw::Str(s)) => s.trim().parse().ok(),
        None => None,
    })
}

/// Convert a device-linked message. Never fails; missing fields become empty.
pub fn linked_to_canonical(native: &LinkedMessage) -> CanonicalMessage {
    let (message_type, content) = native
        .message
        .as_ref()
        .map(classify)
        .unwrap_or((MessageType::Text, String::new()));

    CanonicalMessage {
        id: native.key.id.clone().unwrap_or_default(),
        from: native.key.remote_jid.clone().unwrap_or_default(),
        timestamp: native.message_timestamp.unwrap_or_default(),
        message_type,
        content,
    }
}

fn classify(content: &LinkedContent) -> (MessageType, String) {
    if let Some(text) = &content.conversation {
        return (MessageType::Text, text.clone());
    }
    if let Some(ext) = &content.extended_text_message {
        return (MessageType::Text, ext.text.clone().unwrap_or_default());
    }
    let media = [
        (MessageType::Image, &content.image_message),
        (MessageType::Audio, &content.audio_message),
        (MessageType::Video, &content.video_message),
        (MessageType::Document, &content.document_message),
    ];
    for (message_type, slot) in media {
        if let Some(m) = slot {
            return (message_type, m.caption.clone().unwrap_or_default());
        }
    }
    (MessageType::Text, String::new())
}

/// Build the device-linked send envelope. Only text is supported.
pub fn to_linked_payload(outbound: &OutboundMessage) -> Result<LinkedOutbound, NormalizeError> {
    match &outbound.body {
        OutboundBody::Text(text) => Ok(LinkedOutbound { text: text.clone() }),
        other => Err(NormalizeError::Unsupported {
            kind: other.kind(),
            transport: TransportKind::DeviceLinked,
        }),
    }
}

//! Canonical inbound message and outbound message request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a canonical message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    Audio,
    Video,
    Document,
}

/// Transport-agnostic inbound message.
///
/// Produced by the normalizer from a transport-native message. `id`, `from`
/// and `timestamp` are carried over verbatim; `content` holds the message
/// text, or the caption for media messages (empty when there is none).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalMessage {
    /// Transport-assigned id, unique per conversation.
    pub id: String,
    /// Sender address in transport-native addressing.
    pub from: String,
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub content: String,
}

impl CanonicalMessage {
    /// Timestamp as a UTC date, `None` when out of range.
    pub fn received_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.timestamp, 0)
    }
}

/// A message to send. `to` must already be in the active transport's
/// address format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub to: String,
    pub body: OutboundBody,
}

impl OutboundMessage {
    pub fn text(to: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            body: OutboundBody::Text(text.into()),
        }
    }

    pub fn template(to: impl Into<String>, template: TemplateContent) -> Self {
        Self {
            to: to.into(),
            body: OutboundBody::Template(template),
        }
    }

    pub fn reaction(
        to: impl Into<String>,
        message_id: impl Into<String>,
        emoji: impl Into<String>,
    ) -> Self {
        Self {
            to: to.into(),
            body: OutboundBody::Reaction {
                message_id: message_id.into(),
                emoji: emoji.into(),
            },
        }
    }

    /// Short name of the body variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        self.body.kind()
    }
}

/// Outbound content, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum OutboundBody {
    Text(String),
    Template(TemplateContent),
    Media {
        kind: MediaKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        link: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
    Location(LocationContent),
    Reaction {
        message_id: String,
        emoji: String,
    },
}

impl OutboundBody {
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundBody::Text(_) => "text",
            OutboundBody::Template(_) => "template",
            OutboundBody::Media { kind, .. } => kind.as_str(),
            OutboundBody::Location(_) => "location",
            OutboundBody::Reaction { .. } => "reaction",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Audio,
    Video,
    Document,
    Sticker,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
            MediaKind::Document => "document",
            MediaKind::Sticker => "sticker",
        }
    }
}

/// Pre-approved template reference. Rendering happens remotely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateContent {
    pub name: String,
    pub language: TemplateLanguage,
    #[serde(default)]
    pub components: Vec<TemplateComponent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateLanguage {
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateComponent {
    #[serde(rename = "type")]
    pub component_type: String,
    #[serde(default)]
    pub parameters: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationContent {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// Result of a successful send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    /// Id the remote network assigned to the sent message.
    pub message_id: String,
}

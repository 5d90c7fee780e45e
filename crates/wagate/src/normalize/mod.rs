//! Message normalization.
//!
//! Maps each transport's native message shape to [`CanonicalMessage`] and maps
//! [`OutboundMessage`] requests to each transport's send envelope. Every
//! function here is pure: no I/O, no clock.
//!
//! Inbound type detection checks variants in a fixed order (plain text, rich
//! text, image, audio, video, document) and the first populated one wins;
//! anything else is treated as text. Media captions become `content`.
//!
//! [`CanonicalMessage`]: wagate_protocol::CanonicalMessage
//! [`OutboundMessage`]: wagate_protocol::OutboundMessage

mod business;
mod linked;

pub use business::{business_to_canonical, extract_webhook_messages, to_business_payload};
pub use linked::{
    ExtendedText, LinkedContent, LinkedMedia, LinkedMessage, LinkedOutbound, MessageKey,
    linked_to_canonical, to_linked_payload,
};

use thiserror::Error;
use wagate_protocol::TransportKind;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("{kind} messages are not yet supported for the {transport} transport")]
    Unsupported {
        kind: &'static str,
        transport: TransportKind,
    },

    #[error("invalid {kind} message: {reason}")]
    Invalid { kind: &'static str, reason: String },
}

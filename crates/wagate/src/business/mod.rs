//! Business API transport: a stateless REST client plus webhook payload types.

mod client;
mod types;

pub use client::CloudApiClient;
pub(crate) use types::ErrorEnvelope;
pub use types::{
    ContactProfile, IncomingMessage, MediaBody, MessageResponse, MessageStatus, ResponseContact,
    ResponseMessageId, TextBody, WebhookChange, WebhookContact, WebhookEntry, WebhookEvent,
    WebhookMetadata, WebhookValue,
};

//! Events emitted by a running client.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::message::CanonicalMessage;

/// Connection status of a client. Exactly one value is current at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connecting,
    Open,
    #[default]
    Close,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Open => "open",
            ConnectionStatus::Close => "close",
        };
        f.write_str(s)
    }
}

/// A pairing code in every form a front end may want.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingPayload {
    /// Block-glyph rendering for a terminal.
    pub terminal_form: String,
    /// `data:image/svg+xml;base64,...` URL.
    pub image_data_url: String,
    /// The opaque payload as received.
    pub raw_payload: String,
}

/// Why a session reported an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionErrorKind {
    /// The remote explicitly logged the linked device out.
    LoggedOut,
    /// The remote rejected the protocol version.
    ProtocolRejected,
    /// Too many consecutive failed reconnects.
    ReconnectExhausted,
    /// Credential state could not be written.
    CredentialPersistence,
    /// The socket could not be opened. A reconnect is scheduled.
    ConnectFailed,
    /// The socket dropped. A reconnect is scheduled.
    Disconnected,
}

impl SessionErrorKind {
    /// Terminal errors need operator action (re-pairing, upgrade, disk).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionErrorKind::LoggedOut
                | SessionErrorKind::ProtocolRejected
                | SessionErrorKind::ReconnectExhausted
                | SessionErrorKind::CredentialPersistence
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionError {
    pub kind: SessionErrorKind,
    pub message: String,
}

impl SessionError {
    pub fn new(kind: SessionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Event delivered to subscribers of a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    Pairing(PairingPayload),
    Connection(ConnectionStatus),
    /// Emitted once per transition to `open`.
    Ready,
    /// Inbound message (device-linked transport only).
    Message(CanonicalMessage),
    Error(SessionError),
}

impl ClientEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ClientEvent::Pairing(_) => EventKind::Pairing,
            ClientEvent::Connection(_) => EventKind::Connection,
            ClientEvent::Ready => EventKind::Ready,
            ClientEvent::Message(_) => EventKind::Message,
            ClientEvent::Error(_) => EventKind::Error,
        }
    }
}

/// Discriminant of [`ClientEvent`], used to filter subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Pairing,
    Connection,
    Ready,
    Message,
    Error,
}

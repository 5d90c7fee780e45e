//! The device-linked socket capability.
//!
//! The session engine never speaks the device protocol itself. It opens a
//! socket through a [`SocketConnector`], reads [`SocketEvent`]s from it, and
//! sends through the returned [`LinkedSocket`] handle.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use wagate_protocol::ConnectionStatus;

use crate::credentials::CredentialState;
use crate::normalize::{LinkedMessage, LinkedOutbound};

/// Opens device-linked sockets.
#[async_trait]
pub trait SocketConnector: Send + Sync {
    /// Open a socket authenticated with `credentials`. Unpaired credentials
    /// make the remote start pairing.
    async fn open(&self, credentials: CredentialState) -> Result<SocketSession, SocketError>;
}

/// Handle to one open socket.
#[async_trait]
pub trait LinkedSocket: Send + Sync {
    /// Send one message and return the id the network assigned to it.
    async fn send(&self, to: &str, message: LinkedOutbound) -> Result<String, SocketError>;

    /// Close the socket. Safe to call more than once.
    async fn close(&self);
}

/// A freshly opened socket and its event stream.
pub struct SocketSession {
    pub socket: Arc<dyn LinkedSocket>,
    pub events: mpsc::UnboundedReceiver<SocketEvent>,
}

/// Notification from an open socket.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    /// Opaque pairing payload to present to the user.
    Pairing(String),
    Connection(ConnectionUpdate),
    /// Credential state changed and must be persisted.
    CredentialsUpdated(CredentialState),
    Messages(Vec<LinkedMessage>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionUpdate {
    pub status: ConnectionStatus,
    /// Set for `close` updates when the remote gave a reason.
    pub reason: Option<DisconnectReason>,
}

impl ConnectionUpdate {
    pub fn new(status: ConnectionStatus) -> Self {
        Self {
            status,
            reason: None,
        }
    }

    pub fn closed(reason: Option<DisconnectReason>) -> Self {
        Self {
            status: ConnectionStatus::Close,
            reason,
        }
    }
}

/// Why the remote closed the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The device was unlinked from the phone.
    LoggedOut,
    /// The remote refused our protocol version.
    ProtocolRejected,
    /// The pairing code expired before it was scanned.
    PairingTimeout,
    Other(String),
}

impl DisconnectReason {
    /// Classify a reason string, falling back to an HTTP-style status code
    /// (401 logged out, 405 protocol rejected).
    pub fn from_wire(reason: Option<&str>, status_code: Option<u16>) -> Option<Self> {
        match reason {
            Some("logged_out") => return Some(Self::LoggedOut),
            Some("protocol_rejected") => return Some(Self::ProtocolRejected),
            Some("pairing_timeout") => return Some(Self::PairingTimeout),
            _ => {}
        }
        match status_code {
            Some(401) => Some(Self::LoggedOut),
            Some(405) => Some(Self::ProtocolRejected),
            Some(code) => Some(Self::Other(match reason {
                Some(r) => format!("{r} (status {code})"),
                None => format!("status {code}"),
            })),
            None => reason.map(|r| Self::Other(r.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum SocketError {
    #[error("failed to open socket: {0}")]
    Connect(String),

    #[error("send rejected: {0}")]
    Send(String),

    #[error("socket closed")]
    Closed,

    #[error("no reply from socket within timeout")]
    Timeout,
}

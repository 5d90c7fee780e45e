//! Transport-agnostic types shared by every wagate transport.
//!
//! Upstream layers (access control, webhook routers, agent pipelines) depend
//! only on this crate: they consume [`ClientEvent`]s and produce
//! [`OutboundMessage`]s without knowing which transport is active.
//!
//! # Event stream
//!
//! ```text
//!  device-linked session            business-api client
//!        │                                 │
//!        │ pairing / connection /          │ connection / ready
//!        │ ready / message / error         │
//!        ▼                                 ▼
//!  ┌───────────────────────────────────────────────┐
//!  │             ClientEvent subscribers            │
//!  └───────────────────────────────────────────────┘
//! ```

mod event;
mod message;

pub use event::{
    ClientEvent, ConnectionStatus, EventKind, PairingPayload, SessionError, SessionErrorKind,
};
pub use message::{
    CanonicalMessage, LocationContent, MediaKind, MessageType, OutboundBody, OutboundMessage,
    SendReceipt, TemplateComponent, TemplateContent, TemplateLanguage,
};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The two mutually exclusive transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// Real-time WebSocket session authenticated by a pairing code.
    DeviceLinked,
    /// Stateless HTTP API authenticated by a static credential.
    BusinessApi,
}

impl TransportKind {
    pub const ALL: [TransportKind; 2] = [TransportKind::DeviceLinked, TransportKind::BusinessApi];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::DeviceLinked => "device-linked",
            TransportKind::BusinessApi => "business-api",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransportKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

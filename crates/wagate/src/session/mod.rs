//! Device-linked session management.

mod backoff;
mod bridge;
mod engine;
mod socket;

pub use backoff::{BackoffKind, ReconnectPolicy};
pub use bridge::{BridgeConnector, BridgeFrame, ClientFrame};
pub use engine::{SessionEngine, SessionPhase};
pub use socket::{
    ConnectionUpdate, DisconnectReason, LinkedSocket, SocketConnector, SocketError, SocketEvent,
    SocketSession,
};

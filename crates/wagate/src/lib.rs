//! wagate - a messaging connector with two interchangeable transports.
//!
//! - **device-linked**: a real-time session authenticated by scanning a
//!   pairing code, driven by [`SessionEngine`] over a [`SocketConnector`]
//! - **business-api**: a stateless REST client fed by webhooks
//!
//! Both are exposed as [`MessagingClient`]; [`create_client`] picks one from
//! a [`ConnectorConfig`].

pub mod business;
pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod events;
pub mod normalize;
pub mod pairing;
pub mod selector;
pub mod session;

pub use client::{
    BusinessClient, LinkedClient, MessagingClient, create_client, create_client_with_connector,
};
pub use config::{Config, ConfigError, ConnectorConfig, ReconnectConfig};
pub use error::ClientError;
pub use events::{EventBus, Subscription};
pub use selector::{TransportSettings, select_transport};
pub use session::{SessionEngine, SocketConnector};

pub use wagate_protocol as protocol;

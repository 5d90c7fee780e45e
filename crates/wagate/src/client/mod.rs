//! Unified client facade.
//!
//! Both transports implement [`MessagingClient`]; callers hold an
//! `Arc<dyn MessagingClient>` and never need to know which one is active.

mod business;
mod linked;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;
use wagate_protocol::{ConnectionStatus, OutboundMessage, SendReceipt, TransportKind};

pub use business::BusinessClient;
pub use linked::LinkedClient;

use crate::config::ConnectorConfig;
use crate::error::ClientError;
use crate::events::Subscription;
use crate::selector::{TransportSettings, select_transport};
use crate::session::{BridgeConnector, SocketConnector};

#[async_trait]
pub trait MessagingClient: Send + Sync {
    fn transport(&self) -> TransportKind;

    /// Bring the client up. For device-linked this starts connecting; events
    /// report progress.
    async fn start(&self) -> Result<(), ClientError>;

    async fn stop(&self) -> Result<(), ClientError>;

    async fn send_message(&self, message: &OutboundMessage) -> Result<SendReceipt, ClientError>;

    fn connection_status(&self) -> ConnectionStatus;

    /// Check a webhook verification token. No network call.
    fn verify_webhook(&self, _token: &str) -> Result<bool, ClientError> {
        Err(ClientError::Unsupported {
            operation: "webhook verification",
            transport: self.transport(),
        })
    }

    fn subscribe(&self) -> Subscription;
}

/// Build the client for whichever transport `config` selects.
pub fn create_client(config: &ConnectorConfig) -> Result<Arc<dyn MessagingClient>, ClientError> {
    build(select_transport(config)?, None)
}

/// Like [`create_client`], but device-linked sessions open sockets through
/// `connector` instead of the bridge.
pub fn create_client_with_connector(
    config: &ConnectorConfig,
    connector: Arc<dyn SocketConnector>,
) -> Result<Arc<dyn MessagingClient>, ClientError> {
    build(select_transport(config)?, Some(connector))
}

fn build(
    settings: TransportSettings,
    connector: Option<Arc<dyn SocketConnector>>,
) -> Result<Arc<dyn MessagingClient>, ClientError> {
    info!(transport = %settings.kind(), "Selected transport");
    match settings {
        TransportSettings::DeviceLinked(settings) => {
            let connector: Arc<dyn SocketConnector> = match connector {
                Some(connector) => connector,
                None => Arc::new(BridgeConnector::new(settings.bridge_url.clone())),
            };
            Ok(Arc::new(LinkedClient::new(&settings, connector)))
        }
        TransportSettings::BusinessApi(settings) => Ok(Arc::new(BusinessClient::new(settings)?)),
    }
}

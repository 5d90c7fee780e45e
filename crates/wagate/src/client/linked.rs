use std::sync::Arc;

use async_trait::async_trait;
use wagate_protocol::{ConnectionStatus, OutboundMessage, SendReceipt, TransportKind};

use super::MessagingClient;
use crate::error::ClientError;
use crate::events::Subscription;
use crate::selector::DeviceLinkedSettings;
use crate::session::{SessionEngine, SocketConnector};

/// Device-linked transport, backed by a [`SessionEngine`].
#[derive(Clone)]
pub struct LinkedClient {
    engine: SessionEngine,
}

impl LinkedClient {
    pub fn new(settings: &DeviceLinkedSettings, connector: Arc<dyn SocketConnector>) -> Self {
        Self {
            engine: SessionEngine::new(settings, connector),
        }
    }

    pub fn engine(&self) -> &SessionEngine {
        &self.engine
    }
}

#[async_trait]
impl MessagingClient for LinkedClient {
    fn transport(&self) -> TransportKind {
        TransportKind::DeviceLinked
    }

    async fn start(&self) -> Result<(), ClientError> {
        self.engine.connect().await
    }

    async fn stop(&self) -> Result<(), ClientError> {
        self.engine.disconnect().await;
        Ok(())
    }

    async fn send_message(&self, message: &OutboundMessage) -> Result<SendReceipt, ClientError> {
        self.engine.send(message).await
    }

    fn connection_status(&self) -> ConnectionStatus {
        self.engine.status()
    }

    fn subscribe(&self) -> Subscription {
        self.engine.subscribe()
    }
}

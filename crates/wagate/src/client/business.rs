use std::sync::Mutex;

use async_trait::async_trait;
use tracing::info;
use wagate_protocol::{ClientEvent, ConnectionStatus, OutboundMessage, SendReceipt, TransportKind};

use super::MessagingClient;
use crate::business::CloudApiClient;
use crate::error::ClientError;
use crate::events::{EventBus, Subscription};
use crate::selector::BusinessApiSettings;

/// Business API transport.
///
/// Stateless on the wire: `start` and `stop` only flip the reported status,
/// and `send_message` works whether or not the client was started.
pub struct BusinessClient {
    api: CloudApiClient,
    bus: EventBus,
    status: Mutex<ConnectionStatus>,
}

impl BusinessClient {
    pub fn new(settings: BusinessApiSettings) -> Result<Self, ClientError> {
        Ok(Self::with_api(CloudApiClient::new(settings)?))
    }

    pub fn with_api(api: CloudApiClient) -> Self {
        Self {
            api,
            bus: EventBus::new(),
            status: Mutex::new(ConnectionStatus::Close),
        }
    }

    pub fn api(&self) -> &CloudApiClient {
        &self.api
    }

    /// Webhook subscription handshake; see [`CloudApiClient::verify_subscription`].
    pub fn verify_subscription(&self, mode: &str, token: &str, challenge: &str) -> Option<String> {
        self.api.verify_subscription(mode, token, challenge)
    }

    /// Set the status and publish the change while still holding the lock,
    /// so events follow the order of the status changes.
    fn transition(&self, status: ConnectionStatus) {
        let mut current = self.status.lock().unwrap_or_else(|e| e.into_inner());
        if *current == status {
            return;
        }
        *current = status;
        self.bus.publish(ClientEvent::Connection(status));
        if status == ConnectionStatus::Open {
            info!(
                phone_number_id = %self.api.settings().phone_number_id,
                "Business API client ready"
            );
            self.bus.publish(ClientEvent::Ready);
        }
    }
}

#[async_trait]
impl MessagingClient for BusinessClient {
    fn transport(&self) -> TransportKind {
        TransportKind::BusinessApi
    }

    async fn start(&self) -> Result<(), ClientError> {
        self.transition(ConnectionStatus::Open);
        Ok(())
    }

    async fn stop(&self) -> Result<(), ClientError> {
        self.transition(ConnectionStatus::Close);
        Ok(())
    }

    async fn send_message(&self, message: &OutboundMessage) -> Result<SendReceipt, ClientError> {
        self.api.send(message).await
    }

    fn connection_status(&self) -> ConnectionStatus {
        *self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn verify_webhook(&self, token: &str) -> Result<bool, ClientError> {
        Ok(self.api.verify_webhook(token))
    }

    fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }
}

//! Business API REST client.

use std::time::Duration;

use reqwest::Client;
use subtle::ConstantTimeEq;
use tracing::debug;
use wagate_protocol::{OutboundMessage, SendReceipt};

use super::types::MessageResponse;
use crate::error::{ClientError, api_error, check_response_error};
use crate::normalize::to_business_payload;
use crate::selector::BusinessApiSettings;

/// Stateless client for `POST /{phone_number_id}/messages`.
///
/// Holds no connection and no session; every send is one HTTP request.
#[derive(Debug, Clone)]
pub struct CloudApiClient {
    http: Client,
    settings: BusinessApiSettings,
}

impl CloudApiClient {
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(settings: BusinessApiSettings) -> Result<Self, ClientError> {
        let http = Client::builder().timeout(Self::REQUEST_TIMEOUT).build()?;
        Ok(Self::with_client(http, settings))
    }

    #[must_use]
    pub fn with_client(http: Client, settings: BusinessApiSettings) -> Self {
        Self { http, settings }
    }

    pub fn settings(&self) -> &BusinessApiSettings {
        &self.settings
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/{}/messages",
            self.settings.versioned_base_url(),
            self.settings.phone_number_id
        )
    }

    /// Send one message and return the id the network assigned to it.
    pub async fn send(&self, outbound: &OutboundMessage) -> Result<SendReceipt, ClientError> {
        let payload = to_business_payload(outbound)?;
        let url = self.messages_url();
        debug!(to = %outbound.to, kind = outbound.kind(), "Sending Business API message");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.settings.access_token)
            .json(&payload)
            .send()
            .await?;

        if let Some(err) = check_response_error(&response) {
            return Err(err);
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(api_error(status, &body));
        }

        let status = response.status().as_u16();
        let body: MessageResponse = response.json().await?;
        let Some(first) = body.messages.into_iter().next() else {
            return Err(ClientError::Api {
                status,
                message: "response carried no message id".to_string(),
            });
        };
        Ok(SendReceipt {
            message_id: first.id,
        })
    }

    /// Compare `token` with the configured webhook verify token.
    ///
    /// No network call. Always false when no verify token is configured.
    pub fn verify_webhook(&self, token: &str) -> bool {
        match &self.settings.webhook_verify_token {
            Some(expected) => expected.as_bytes().ct_eq(token.as_bytes()).into(),
            None => false,
        }
    }

    /// Answer the webhook subscription handshake: returns the challenge to
    /// echo back when `mode` is `subscribe` and the token matches.
    pub fn verify_subscription(&self, mode: &str, token: &str, challenge: &str) -> Option<String> {
        (mode == "subscribe" && self.verify_webhook(token)).then(|| challenge.to_string())
    }
}

//! Client error types.

use thiserror::Error;
use wagate_protocol::TransportKind;

use crate::business::ErrorEnvelope;
use crate::config::ConfigError;
use crate::credentials::CredentialError;
use crate::normalize::NormalizeError;

/// Check an HTTP response for rate-limit errors, returning `RateLimit` for 429.
pub fn check_response_error(response: &reqwest::Response) -> Option<ClientError> {
    if response.status().is_success() {
        return None;
    }
    if response.status().as_u16() == 429 {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        return Some(ClientError::RateLimit { retry_after });
    }
    None
}

/// Turn a non-success response body into an `Api` error, preferring the
/// Graph API's `error.message` when the body carries one.
pub(crate) fn api_error(status: u16, body: &str) -> ClientError {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|envelope| match envelope.error.code {
            Some(code) => format!("{} (code {code})", envelope.error.message),
            None => envelope.error.message,
        })
        .unwrap_or_else(|_| body.to_string());
    ClientError::Api { status, message }
}

/// Errors surfaced by [`crate::MessagingClient`] operations.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Credentials(#[from] CredentialError),

    /// The operation has no meaning for this transport
    #[error("{operation} is not supported by the {transport} transport")]
    Unsupported {
        operation: &'static str,
        transport: TransportKind,
    },

    /// No open socket; the message was not queued
    #[error("not connected")]
    NotConnected,

    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    /// HTTP request failed
    #[error("http request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// API returned an error response
    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Rate limited (429)
    #[error("rate limited (retry after {retry_after:?}s)")]
    RateLimit { retry_after: Option<u64> },

    /// The socket rejected or failed the send
    #[error("send failed: {0}")]
    Send(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_prefers_graph_message() {
        let body = r#"{"error":{"message":"Invalid OAuth access token","type":"OAuthException","code":190}}"#;
        match api_error(401, body) {
            ClientError::Api { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "Invalid OAuth access token (code 190)");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn api_error_falls_back_to_raw_body() {
        match api_error(502, "Bad Gateway") {
            ClientError::Api { message, .. } => assert_eq!(message, "Bad Gateway"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unsupported_names_transport() {
        let err = ClientError::Unsupported {
            operation: "webhook verification",
            transport: TransportKind::DeviceLinked,
        };
        assert_eq!(
            err.to_string(),
            "webhook verification is not supported by the device-linked transport"
        );
    }
}

//! WebSocket bridge connector.
//!
//! The device protocol itself lives in a bridge process that embeds the
//! network's client library. This connector talks to it over a local
//! WebSocket, one JSON frame per text message:
//!
//! ```text
//! client → bridge   hello { credentials }
//!                   send { request_id, to, message }
//! bridge → client   pairing { payload }
//!                   connection { status, reason?, status_code? }
//!                   credentials { credentials }
//!                   messages { messages }
//!                   send_result { request_id, message_id?, error? }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;
use wagate_protocol::ConnectionStatus;

use super::socket::{
    ConnectionUpdate, DisconnectReason, LinkedSocket, SocketConnector, SocketError, SocketEvent,
    SocketSession,
};
use crate::credentials::CredentialState;
use crate::normalize::{LinkedMessage, LinkedOutbound};

/// Frames sent to the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Hello {
        credentials: serde_json::Value,
    },
    Send {
        request_id: String,
        to: String,
        message: LinkedOutbound,
    },
}

/// Frames received from the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeFrame {
    Pairing {
        payload: String,
    },
    Connection {
        status: ConnectionStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,
    },
    Credentials {
        credentials: serde_json::Value,
    },
    Messages {
        messages: Vec<LinkedMessage>,
    },
    SendResult {
        request_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

type PendingSends = DashMap<String, oneshot::Sender<Result<String, SocketError>>>;

/// [`SocketConnector`] backed by a bridge process.
#[derive(Debug, Clone)]
pub struct BridgeConnector {
    url: Url,
    request_timeout: Duration,
}

impl BridgeConnector {
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(url: Url) -> Self {
        Self {
            url,
            request_timeout: Self::DEFAULT_REQUEST_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl SocketConnector for BridgeConnector {
    async fn open(&self, credentials: CredentialState) -> Result<SocketSession, SocketError> {
        let (ws, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| SocketError::Connect(format!("{}: {e}", self.url)))?;
        let (mut sink, mut stream) = ws.split();

        let hello = encode(&ClientFrame::Hello {
            credentials: credentials.into_value(),
        })?;
        sink.send(hello)
            .await
            .map_err(|e| SocketError::Connect(e.to_string()))?;
        debug!(url = %self.url, "Connected to bridge");

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let pending: Arc<PendingSends> = Arc::new(DashMap::new());
        let shutdown = CancellationToken::new();

        // Writer
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if let Err(e) = sink.send(msg).await {
                    debug!(error = %e, "Bridge write failed");
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        // Reader
        let reader_pending = Arc::clone(&pending);
        let reader_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut close_reported = false;
            loop {
                let frame = tokio::select! {
                    biased;
                    _ = reader_shutdown.cancelled() => break,
                    frame = stream.next() => frame,
                };
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!(error = %e, "Bridge read failed");
                        break;
                    }
                };
                let frame = match serde_json::from_str::<BridgeFrame>(text.as_str()) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(error = %e, "Ignoring malformed bridge frame");
                        continue;
                    }
                };
                if let Some(event) = dispatch(frame, &reader_pending) {
                    if matches!(
                        &event,
                        SocketEvent::Connection(update) if update.status == ConnectionStatus::Close
                    ) {
                        close_reported = true;
                    }
                    if event_tx.send(event).is_err() {
                        break;
                    }
                }
            }

            for entry in reader_pending.iter() {
                debug!(request_id = %entry.key(), "Failing pending send, bridge gone");
            }
            reader_pending.clear();

            if !close_reported && !reader_shutdown.is_cancelled() {
                let reason = DisconnectReason::Other("bridge connection lost".to_string());
                let _ = event_tx.send(SocketEvent::Connection(ConnectionUpdate::closed(Some(
                    reason,
                ))));
            }
        });

        let socket = BridgeSocket {
            out_tx,
            pending,
            shutdown,
            request_timeout: self.request_timeout,
        };
        Ok(SocketSession {
            socket: Arc::new(socket),
            events: event_rx,
        })
    }
}

/// Route a bridge frame: send results resolve their request, everything else
/// becomes a socket event.
fn dispatch(frame: BridgeFrame, pending: &PendingSends) -> Option<SocketEvent> {
    match frame {
        BridgeFrame::Pairing { payload } => Some(SocketEvent::Pairing(payload)),
        BridgeFrame::Connection {
            status,
            reason,
            status_code,
        } => {
            let reason = match status {
                ConnectionStatus::Close => DisconnectReason::from_wire(reason.as_deref(), status_code),
                _ => None,
            };
            Some(SocketEvent::Connection(ConnectionUpdate { status, reason }))
        }
        BridgeFrame::Credentials { credentials } => Some(SocketEvent::CredentialsUpdated(
            CredentialState::from_value(credentials),
        )),
        BridgeFrame::Messages { messages } => Some(SocketEvent::Messages(messages)),
        BridgeFrame::SendResult {
            request_id,
            message_id,
            error,
        } => {
            let Some((_, reply)) = pending.remove(&request_id) else {
                debug!(request_id = %request_id, "Send result for unknown request");
                return None;
            };
            let result = match (message_id, error) {
                (_, Some(error)) => Err(SocketError::Send(error)),
                (Some(id), None) => Ok(id),
                (None, None) => Err(SocketError::Send("bridge returned no message id".to_string())),
            };
            let _ = reply.send(result);
            None
        }
    }
}

fn encode(frame: &ClientFrame) -> Result<Message, SocketError> {
    serde_json::to_string(frame)
        .map(Message::text)
        .map_err(|e| SocketError::Send(e.to_string()))
}

struct BridgeSocket {
    out_tx: mpsc::UnboundedSender<Message>,
    pending: Arc<PendingSends>,
    shutdown: CancellationToken,
    request_timeout: Duration,
}

#[async_trait]
impl LinkedSocket for BridgeSocket {
    async fn send(&self, to: &str, message: LinkedOutbound) -> Result<String, SocketError> {
        if self.shutdown.is_cancelled() {
            return Err(SocketError::Closed);
        }
        let request_id = ulid::Ulid::new().to_string();
        let frame = encode(&ClientFrame::Send {
            request_id: request_id.clone(),
            to: to.to_string(),
            message,
        })?;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.insert(request_id.clone(), reply_tx);
        if self.out_tx.send(frame).is_err() {
            self.pending.remove(&request_id);
            return Err(SocketError::Closed);
        }

        match tokio::time::timeout(self.request_timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SocketError::Closed),
            Err(_) => {
                self.pending.remove(&request_id);
                Err(SocketError::Timeout)
            }
        }
    }

    async fn close(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        let _ = self.out_tx.send(Message::Close(None));
        self.pending.clear();
    }
}

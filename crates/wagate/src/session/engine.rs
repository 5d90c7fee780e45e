//! Device-linked session lifecycle.
//!
//! ```text
//!            connect()              open
//!   idle ─────────────▶ connecting ──────▶ open
//!    ▲                    │  ▲               │
//!    │                    │  │ backoff       │ close
//!    │                    ▼  │               ▼
//!    └──── disconnect() ── closed ◀──────────┘
//! ```
//!
//! Every socket gets a generation number. Only the pump of the current
//! generation may change state; events from a superseded socket are dropped.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use wagate_protocol::{
    ClientEvent, ConnectionStatus, OutboundMessage, PairingPayload, SendReceipt, SessionError,
    SessionErrorKind,
};

use super::backoff::{BackoffKind, ReconnectPolicy};
use super::socket::{DisconnectReason, LinkedSocket, SocketConnector, SocketEvent};
use crate::credentials::{CredentialResult, CredentialState, FileCredentialStore};
use crate::error::ClientError;
use crate::events::{EventBus, Subscription};
use crate::normalize::{LinkedMessage, linked_to_canonical, to_linked_payload};
use crate::pairing;
use crate::selector::DeviceLinkedSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Connecting,
    Open,
    Closed,
}

struct EngineState {
    phase: SessionPhase,
    status: ConnectionStatus,
    socket: Option<Arc<dyn LinkedSocket>>,
    generation: u64,
    attempts: u32,
    /// Set while a reconnect is scheduled.
    reconnect: Option<CancellationToken>,
    pump: Option<CancellationToken>,
}

enum CloseCause {
    Remote(Option<DisconnectReason>),
    ConnectFailed(String),
}

struct Inner {
    store: FileCredentialStore,
    connector: Arc<dyn SocketConnector>,
    policy: ReconnectPolicy,
    print_pairing: bool,
    bus: EventBus,
    state: Mutex<EngineState>,
}

/// Owns the device-linked socket and drives connect, pairing and reconnect.
#[derive(Clone)]
pub struct SessionEngine {
    inner: Arc<Inner>,
}

impl SessionEngine {
    pub fn new(settings: &DeviceLinkedSettings, connector: Arc<dyn SocketConnector>) -> Self {
        Self {
            inner: Arc::new(Inner {
                store: FileCredentialStore::new(&settings.session_directory),
                connector,
                policy: ReconnectPolicy::from_config(&settings.reconnect),
                print_pairing: settings.print_pairing_in_terminal,
                bus: EventBus::new(),
                state: Mutex::new(EngineState {
                    phase: SessionPhase::Idle,
                    status: ConnectionStatus::Close,
                    socket: None,
                    generation: 0,
                    attempts: 0,
                    reconnect: None,
                    pump: None,
                }),
            }),
        }
    }

    /// Start a connection attempt. A no-op while connecting or open.
    ///
    /// Only credential I/O errors are returned; socket failures are reported
    /// as events and retried.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.inner.connect().await
    }

    /// Tear the session down. Idempotent; never schedules a reconnect.
    pub async fn disconnect(&self) {
        self.inner.disconnect().await;
    }

    /// Send over the open socket. Never queued.
    pub async fn send(&self, message: &OutboundMessage) -> Result<SendReceipt, ClientError> {
        let payload = to_linked_payload(message)?;
        let socket = {
            let state = self.inner.lock();
            match (state.phase, &state.socket) {
                (SessionPhase::Open, Some(socket)) => Arc::clone(socket),
                _ => return Err(ClientError::NotConnected),
            }
        };
        let message_id = socket
            .send(&message.to, payload)
            .await
            .map_err(|e| ClientError::Send(e.to_string()))?;
        debug!(to = %message.to, message_id = %message_id, "Sent device-linked message");
        Ok(SendReceipt { message_id })
    }

    pub fn phase(&self) -> SessionPhase {
        self.inner.lock().phase
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.lock().status
    }

    /// Consecutive failed connection attempts since the last `open`.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.lock().attempts
    }

    pub fn reconnect_pending(&self) -> bool {
        self.inner.lock().reconnect.is_some()
    }

    pub fn subscribe(&self) -> Subscription {
        self.inner.bus.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn credentials(&self) -> &FileCredentialStore {
        &self.inner.store
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_status(&self, state: &mut EngineState, status: ConnectionStatus) {
        if state.status != status {
            state.status = status;
            self.bus.publish(ClientEvent::Connection(status));
        }
    }

    fn publish_error(&self, kind: SessionErrorKind, message: impl Into<String>) {
        self.bus
            .publish(ClientEvent::Error(SessionError::new(kind, message)));
    }

    fn is_current(&self, generation: u64) -> bool {
        let state = self.lock();
        state.generation == generation
            && matches!(state.phase, SessionPhase::Connecting | SessionPhase::Open)
    }

    async fn connect(self: &Arc<Self>) -> Result<(), ClientError> {
        let generation = {
            let mut state = self.lock();
            match Self::claim_attempt(&mut state) {
                Some(generation) => generation,
                None => return Ok(()),
            }
        };
        self.open_attempt(generation).await
    }

    /// Move to connecting under a fresh generation, unless already active.
    fn claim_attempt(state: &mut EngineState) -> Option<u64> {
        if matches!(state.phase, SessionPhase::Connecting | SessionPhase::Open) {
            debug!(phase = ?state.phase, "Session already active, ignoring connect");
            return None;
        }
        if let Some(pending) = state.reconnect.take() {
            pending.cancel();
        }
        state.phase = SessionPhase::Connecting;
        state.generation += 1;
        Some(state.generation)
    }

    async fn open_attempt(self: &Arc<Self>, generation: u64) -> Result<(), ClientError> {
        let credentials = match self.store.initialize().await {
            Ok(credentials) => credentials,
            Err(e) => {
                let mut state = self.lock();
                if state.generation == generation {
                    state.phase = SessionPhase::Closed;
                }
                return Err(e.into());
            }
        };

        {
            let mut state = self.lock();
            if state.generation != generation {
                return Ok(());
            }
            self.set_status(&mut state, ConnectionStatus::Connecting);
        }
        info!(generation, "Opening device-linked socket");

        match self.connector.open(credentials).await {
            Ok(session) => {
                let cancel = CancellationToken::new();
                let superseded = {
                    let mut state = self.lock();
                    if state.generation == generation {
                        state.socket = Some(Arc::clone(&session.socket));
                        state.pump = Some(cancel.clone());
                        false
                    } else {
                        true
                    }
                };
                if superseded {
                    debug!(generation, "Socket opened after disconnect, closing it");
                    session.socket.close().await;
                    return Ok(());
                }
                tokio::spawn(Arc::clone(self).pump(generation, session.events, cancel));
            }
            Err(e) => {
                warn!(generation, error = %e, "Failed to open socket");
                self.handle_close(generation, CloseCause::ConnectFailed(e.to_string()))
                    .await;
            }
        }
        Ok(())
    }

    async fn disconnect(&self) {
        let socket = {
            let mut state = self.lock();
            state.generation += 1;
            if let Some(pending) = state.reconnect.take() {
                pending.cancel();
            }
            if let Some(pump) = state.pump.take() {
                pump.cancel();
            }
            if state.phase != SessionPhase::Idle {
                state.phase = SessionPhase::Closed;
            }
            self.set_status(&mut state, ConnectionStatus::Close);
            state.socket.take()
        };
        if let Some(socket) = socket {
            info!("Closing device-linked socket");
            socket.close().await;
        }
    }

    /// Process one socket's events strictly in order until it closes.
    async fn pump(
        self: Arc<Self>,
        generation: u64,
        mut events: mpsc::UnboundedReceiver<SocketEvent>,
        cancel: CancellationToken,
    ) {
        debug!(generation, "Socket event pump started");
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            let Some(event) = event else {
                let reason = DisconnectReason::Other("socket event stream ended".to_string());
                self.handle_close(generation, CloseCause::Remote(Some(reason)))
                    .await;
                break;
            };
            if !self.is_current(generation) {
                debug!(generation, "Dropping event from superseded socket");
                break;
            }

            match event {
                SocketEvent::Pairing(raw) => self.handle_pairing(&raw),
                SocketEvent::Connection(update) => match update.status {
                    ConnectionStatus::Open => self.handle_open(generation),
                    ConnectionStatus::Connecting => debug!(generation, "Socket handshaking"),
                    ConnectionStatus::Close => {
                        self.handle_close(generation, CloseCause::Remote(update.reason))
                            .await;
                        break;
                    }
                },
                SocketEvent::CredentialsUpdated(state) => {
                    if let Err(e) = self.persist_credentials(state).await {
                        error!(error = %e, "Failed to persist credentials, closing session");
                        self.publish_error(SessionErrorKind::CredentialPersistence, e.to_string());
                        self.disconnect().await;
                        break;
                    }
                }
                SocketEvent::Messages(batch) => self.handle_messages(batch),
            }
        }
        debug!(generation, "Socket event pump stopped");
    }

    fn handle_pairing(&self, raw: &str) {
        if self.lock().phase != SessionPhase::Connecting {
            debug!("Ignoring pairing code outside of connecting");
            return;
        }
        match pairing::render_pairing(raw) {
            Ok(payload) => {
                if self.print_pairing
                    && let Err(e) = pairing::print_to_terminal(&payload, std::io::stdout().lock())
                {
                    warn!(error = %e, "Failed to print pairing code");
                }
                info!("Pairing code received, waiting for scan");
                self.bus.publish(ClientEvent::Pairing(payload));
            }
            Err(e) => {
                warn!(error = %e, "Failed to render pairing code, publishing raw payload only");
                self.bus.publish(ClientEvent::Pairing(PairingPayload {
                    terminal_form: String::new(),
                    image_data_url: String::new(),
                    raw_payload: raw.to_string(),
                }));
            }
        }
    }

    fn handle_open(&self, generation: u64) {
        let mut state = self.lock();
        if state.phase == SessionPhase::Open {
            return;
        }
        state.phase = SessionPhase::Open;
        let previous_attempts = std::mem::take(&mut state.attempts);
        self.set_status(&mut state, ConnectionStatus::Open);
        self.bus.publish(ClientEvent::Ready);
        info!(generation, previous_attempts, "Device-linked session open");
    }

    fn handle_messages(&self, batch: Vec<LinkedMessage>) {
        for native in batch {
            if native.key.from_me {
                continue;
            }
            self.bus
                .publish(ClientEvent::Message(linked_to_canonical(&native)));
        }
    }

    async fn persist_credentials(&self, state: CredentialState) -> CredentialResult<()> {
        self.store.replace(state);
        self.store.save().await
    }

    async fn handle_close(self: &Arc<Self>, generation: u64, cause: CloseCause) {
        let socket = {
            let mut state = self.lock();
            if state.generation != generation
                || !matches!(state.phase, SessionPhase::Connecting | SessionPhase::Open)
            {
                return;
            }
            state.phase = SessionPhase::Closed;
            if let Some(pump) = state.pump.take() {
                pump.cancel();
            }
            self.set_status(&mut state, ConnectionStatus::Close);

            match cause {
                CloseCause::Remote(Some(DisconnectReason::LoggedOut)) => {
                    warn!("Device was logged out, pairing required");
                    self.publish_error(
                        SessionErrorKind::LoggedOut,
                        "device was logged out; remove the session directory and pair again",
                    );
                }
                CloseCause::Remote(Some(DisconnectReason::ProtocolRejected)) => {
                    error!("Remote rejected the protocol version");
                    self.publish_error(
                        SessionErrorKind::ProtocolRejected,
                        "remote rejected the protocol version; the bridge needs an upgrade",
                    );
                }
                CloseCause::Remote(Some(DisconnectReason::PairingTimeout)) => {
                    info!("Pairing code expired, requesting a new one");
                    self.schedule_reconnect(&mut state, BackoffKind::PairingTimeout);
                }
                CloseCause::Remote(reason) => {
                    let detail = match reason {
                        Some(DisconnectReason::Other(detail)) => detail,
                        _ => "connection closed".to_string(),
                    };
                    warn!(reason = %detail, "Socket closed");
                    self.publish_error(SessionErrorKind::Disconnected, detail);
                    self.schedule_reconnect(&mut state, BackoffKind::Transient);
                }
                CloseCause::ConnectFailed(detail) => {
                    self.publish_error(SessionErrorKind::ConnectFailed, detail);
                    self.schedule_reconnect(&mut state, BackoffKind::Transient);
                }
            }
            state.socket.take()
        };
        if let Some(socket) = socket {
            socket.close().await;
        }
    }

    fn schedule_reconnect(self: &Arc<Self>, state: &mut EngineState, kind: BackoffKind) {
        state.attempts = state.attempts.saturating_add(1);
        let attempt = state.attempts;
        if attempt >= self.policy.max_attempts() {
            error!(attempts = attempt, "Giving up on reconnecting");
            self.publish_error(
                SessionErrorKind::ReconnectExhausted,
                format!("gave up after {attempt} consecutive failed connection attempts"),
            );
            return;
        }

        let delay = self.policy.delay(kind, attempt);
        info!(attempt, delay_ms = delay.as_millis() as u64, ?kind, "Scheduling reconnect");

        let token = CancellationToken::new();
        if let Some(previous) = state.reconnect.replace(token.clone()) {
            previous.cancel();
        }
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!(attempt, "Pending reconnect cancelled");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
            inner.fire_reconnect(token).await;
        });
    }

    async fn fire_reconnect(self: Arc<Self>, token: CancellationToken) {
        let generation = {
            let mut state = self.lock();
            // Cancelled under the lock by connect() or disconnect().
            if token.is_cancelled() {
                return;
            }
            state.reconnect = None;
            match Self::claim_attempt(&mut state) {
                Some(generation) => generation,
                None => return,
            }
        };
        if let Err(e) = self.open_attempt(generation).await {
            error!(error = %e, "Reconnect could not load credentials");
            self.publish_error(SessionErrorKind::CredentialPersistence, e.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;
    use tempfile::TempDir;
    use tokio::time::Instant;
    use url::Url;
    use wagate_protocol::{MessageType, TemplateContent, TemplateLanguage};

    use crate::config::ReconnectConfig;
    use crate::normalize::{LinkedContent, LinkedOutbound, MessageKey};
    use crate::selector::DEFAULT_BRIDGE_URL;
    use crate::session::socket::{ConnectionUpdate, SocketError, SocketSession};

    #[derive(Default)]
    struct MockSocket {
        sent: Mutex<Vec<(String, LinkedOutbound)>>,
        closes: AtomicUsize,
    }

    #[async_trait]
    impl LinkedSocket for MockSocket {
        async fn send(&self, to: &str, message: LinkedOutbound) -> Result<String, SocketError> {
            let mut sent = self.sent.lock().unwrap();
            sent.push((to.to_string(), message));
            Ok(format!("3EB0{}", sent.len()))
        }

        async fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Opened {
        events: mpsc::UnboundedSender<SocketEvent>,
        socket: Arc<MockSocket>,
    }

    #[derive(Default)]
    struct MockConnector {
        opened: Mutex<Vec<Opened>>,
        attempts: AtomicUsize,
        fail_opens: AtomicUsize,
        /// When set, `open` waits for a permit before handing out a socket.
        gate: Mutex<Option<Arc<tokio::sync::Notify>>>,
    }

    impl MockConnector {
        fn emit(&self, event: SocketEvent) {
            let opened = self.opened.lock().unwrap();
            opened.last().unwrap().events.send(event).unwrap();
        }

        fn socket(&self, index: usize) -> Arc<MockSocket> {
            Arc::clone(&self.opened.lock().unwrap()[index].socket)
        }

        fn open_attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SocketConnector for MockConnector {
        async fn open(&self, _credentials: CredentialState) -> Result<SocketSession, SocketError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail_opens.load(Ordering::SeqCst) > 0 {
                self.fail_opens.fetch_sub(1, Ordering::SeqCst);
                return Err(SocketError::Connect("connection refused".to_string()));
            }
            let gate = self.gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            let (tx, rx) = mpsc::unbounded_channel();
            let socket = Arc::new(MockSocket::default());
            self.opened.lock().unwrap().push(Opened {
                events: tx,
                socket: Arc::clone(&socket),
            });
            Ok(SocketSession { socket, events: rx })
        }
    }

    fn settings(dir: &Path) -> DeviceLinkedSettings {
        DeviceLinkedSettings {
            session_directory: dir.to_path_buf(),
            print_pairing_in_terminal: false,
            bridge_url: Url::parse(DEFAULT_BRIDGE_URL).unwrap(),
            reconnect: ReconnectConfig::default(),
        }
    }

    fn setup(tmp: &TempDir) -> (SessionEngine, Arc<MockConnector>, Subscription) {
        let connector = Arc::new(MockConnector::default());
        let engine = SessionEngine::new(&settings(tmp.path()), connector.clone());
        let sub = engine.subscribe();
        (engine, connector, sub)
    }

    async fn next(sub: &mut Subscription) -> ClientEvent {
        tokio::time::timeout(Duration::from_secs(300), sub.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event bus closed")
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    fn closed(reason: DisconnectReason) -> SocketEvent {
        SocketEvent::Connection(ConnectionUpdate::closed(Some(reason)))
    }

    fn opened() -> SocketEvent {
        SocketEvent::Connection(ConnectionUpdate::new(ConnectionStatus::Open))
    }

    fn error_kind(event: &ClientEvent) -> Option<SessionErrorKind> {
        match event {
            ClientEvent::Error(e) => Some(e.kind),
            _ => None,
        }
    }

    async fn open_session(
        engine: &SessionEngine,
        connector: &MockConnector,
        sub: &mut Subscription,
    ) {
        engine.connect().await.unwrap();
        assert_eq!(
            next(sub).await,
            ClientEvent::Connection(ConnectionStatus::Connecting)
        );
        connector.emit(opened());
        assert_eq!(next(sub).await, ClientEvent::Connection(ConnectionStatus::Open));
        assert_eq!(next(sub).await, ClientEvent::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_then_open_emits_in_order() {
        let tmp = TempDir::new().unwrap();
        let (engine, connector, mut sub) = setup(&tmp);
        assert_eq!(engine.phase(), SessionPhase::Idle);
        assert_eq!(engine.status(), ConnectionStatus::Close);

        open_session(&engine, &connector, &mut sub).await;
        assert_eq!(engine.phase(), SessionPhase::Open);
        assert_eq!(engine.status(), ConnectionStatus::Open);
        assert_eq!(engine.reconnect_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_is_ignored_while_active() {
        let tmp = TempDir::new().unwrap();
        let (engine, connector, mut sub) = setup(&tmp);

        engine.connect().await.unwrap();
        engine.connect().await.unwrap();
        assert_eq!(connector.open_attempts(), 1);

        connector.emit(opened());
        next(&mut sub).await;
        next(&mut sub).await;
        next(&mut sub).await;
        engine.connect().await.unwrap();
        assert_eq!(connector.open_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pairing_code_is_rendered_and_published() {
        let tmp = TempDir::new().unwrap();
        let (engine, connector, mut sub) = setup(&tmp);

        engine.connect().await.unwrap();
        next(&mut sub).await;
        connector.emit(SocketEvent::Pairing("2@pairing-ref,noise,identity,adv".to_string()));

        match next(&mut sub).await {
            ClientEvent::Pairing(payload) => {
                assert_eq!(payload.raw_payload, "2@pairing-ref,noise,identity,adv");
                assert!(payload.image_data_url.starts_with("data:image/svg+xml;base64,"));
                assert!(!payload.terminal_form.is_empty());
            }
            other => panic!("expected pairing, got {other:?}"),
        }
        assert_eq!(engine.phase(), SessionPhase::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn unrenderable_pairing_code_still_publishes_raw_payload() {
        let tmp = TempDir::new().unwrap();
        let (engine, connector, mut sub) = setup(&tmp);

        engine.connect().await.unwrap();
        next(&mut sub).await;
        let oversized = "A".repeat(5000);
        connector.emit(SocketEvent::Pairing(oversized.clone()));

        match next(&mut sub).await {
            ClientEvent::Pairing(payload) => {
                assert_eq!(payload.raw_payload, oversized);
                assert!(payload.terminal_form.is_empty());
                assert!(payload.image_data_url.is_empty());
            }
            other => panic!("expected pairing, got {other:?}"),
        }
        assert_eq!(engine.phase(), SessionPhase::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_during_reconnect_attempt_stays_closed() {
        let tmp = TempDir::new().unwrap();
        let (engine, connector, mut sub) = setup(&tmp);
        open_session(&engine, &connector, &mut sub).await;

        connector.emit(closed(DisconnectReason::Other("stream errored".to_string())));
        assert_eq!(next(&mut sub).await, ClientEvent::Connection(ConnectionStatus::Close));
        assert_eq!(
            error_kind(&next(&mut sub).await),
            Some(SessionErrorKind::Disconnected)
        );

        let gate = Arc::new(tokio::sync::Notify::new());
        *connector.gate.lock().unwrap() = Some(Arc::clone(&gate));
        assert_eq!(
            next(&mut sub).await,
            ClientEvent::Connection(ConnectionStatus::Connecting)
        );
        settle().await;
        assert_eq!(connector.open_attempts(), 2);
        assert!(!engine.reconnect_pending());

        engine.disconnect().await;
        assert_eq!(next(&mut sub).await, ClientEvent::Connection(ConnectionStatus::Close));

        gate.notify_one();
        settle().await;
        assert_eq!(engine.phase(), SessionPhase::Closed);
        assert_eq!(engine.status(), ConnectionStatus::Close);
        assert_eq!(connector.socket(1).closes.load(Ordering::SeqCst), 1);
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_messages_are_normalized_and_own_messages_skipped() {
        let tmp = TempDir::new().unwrap();
        let (engine, connector, mut sub) = setup(&tmp);
        open_session(&engine, &connector, &mut sub).await;

        let own = LinkedMessage {
            key: MessageKey {
                remote_jid: Some("1@s.whatsapp.net".to_string()),
                from_me: true,
                id: Some("SELF".to_string()),
                participant: None,
            },
            message: Some(LinkedContent {
                conversation: Some("echo".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let theirs = LinkedMessage {
            key: MessageKey {
                remote_jid: Some("15551234567@s.whatsapp.net".to_string()),
                from_me: false,
                id: Some("3EB0AA".to_string()),
                participant: None,
            },
            message_timestamp: Some(1_700_000_000),
            message: Some(LinkedContent {
                conversation: Some("hi".to_string()),
                ..Default::default()
            }),
            push_name: Some("Ada".to_string()),
        };
        connector.emit(SocketEvent::Messages(vec![own, theirs]));

        match next(&mut sub).await {
            ClientEvent::Message(msg) => {
                assert_eq!(msg.id, "3EB0AA");
                assert_eq!(msg.from, "15551234567@s.whatsapp.net");
                assert_eq!(msg.message_type, MessageType::Text);
                assert_eq!(msg.content, "hi");
            }
            other => panic!("expected message, got {other:?}"),
        }
        settle().await;
        assert_eq!(sub.try_recv(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn send_requires_open_socket() {
        let tmp = TempDir::new().unwrap();
        let (engine, connector, mut sub) = setup(&tmp);
        let hello = OutboundMessage::text("15551234567@s.whatsapp.net", "hello");

        assert!(matches!(
            engine.send(&hello).await,
            Err(ClientError::NotConnected)
        ));

        engine.connect().await.unwrap();
        assert!(matches!(
            engine.send(&hello).await,
            Err(ClientError::NotConnected)
        ));

        connector.emit(opened());
        next(&mut sub).await;
        next(&mut sub).await;
        next(&mut sub).await;

        let receipt = engine.send(&hello).await.unwrap();
        assert_eq!(receipt.message_id, "3EB01");
        let sent = connector.socket(0).sent.lock().unwrap().clone();
        assert_eq!(
            sent,
            vec![(
                "15551234567@s.whatsapp.net".to_string(),
                LinkedOutbound {
                    text: "hello".to_string()
                }
            )]
        );

        let template = OutboundMessage::template(
            "15551234567@s.whatsapp.net",
            TemplateContent {
                name: "hello_world".to_string(),
                language: TemplateLanguage {
                    code: "en_US".to_string(),
                },
                components: vec![],
            },
        );
        assert!(matches!(
            engine.send(&template).await,
            Err(ClientError::Normalize(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_disconnects_back_off_and_open_resets_counter() {
        let tmp = TempDir::new().unwrap();
        let (engine, connector, mut sub) = setup(&tmp);
        open_session(&engine, &connector, &mut sub).await;

        let mut previous = Duration::ZERO;
        for attempt in 1..=5u32 {
            let closed_at = Instant::now();
            connector.emit(closed(DisconnectReason::Other("stream errored".to_string())));

            assert_eq!(next(&mut sub).await, ClientEvent::Connection(ConnectionStatus::Close));
            assert_eq!(
                error_kind(&next(&mut sub).await),
                Some(SessionErrorKind::Disconnected)
            );
            assert_eq!(engine.reconnect_attempts(), attempt);
            assert!(engine.reconnect_pending());

            assert_eq!(
                next(&mut sub).await,
                ClientEvent::Connection(ConnectionStatus::Connecting)
            );
            settle().await;
            let waited = closed_at.elapsed();
            let expected = Duration::from_secs(3 * 2u64.pow(attempt - 1)).min(Duration::from_secs(30));
            assert!(waited >= expected, "attempt {attempt}: waited {waited:?}");
            assert!(waited < expected + Duration::from_secs(1));
            assert!(waited > previous, "delays must strictly increase");
            assert!(waited <= Duration::from_secs(31));
            previous = waited;
        }
        assert_eq!(engine.reconnect_attempts(), 5);
        assert_eq!(connector.open_attempts(), 6);

        connector.emit(opened());
        assert_eq!(next(&mut sub).await, ClientEvent::Connection(ConnectionStatus::Open));
        assert_eq!(next(&mut sub).await, ClientEvent::Ready);
        assert_eq!(engine.reconnect_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn tenth_consecutive_failure_gives_up() {
        let tmp = TempDir::new().unwrap();
        let (engine, connector, mut sub) = setup(&tmp);
        connector.fail_opens.store(usize::MAX, Ordering::SeqCst);

        engine.connect().await.unwrap();
        for attempt in 1..=10u32 {
            assert_eq!(
                next(&mut sub).await,
                ClientEvent::Connection(ConnectionStatus::Connecting),
                "attempt {attempt}"
            );
            assert_eq!(next(&mut sub).await, ClientEvent::Connection(ConnectionStatus::Close));
            assert_eq!(
                error_kind(&next(&mut sub).await),
                Some(SessionErrorKind::ConnectFailed)
            );
        }
        let exhausted = next(&mut sub).await;
        assert_eq!(error_kind(&exhausted), Some(SessionErrorKind::ReconnectExhausted));
        assert!(matches!(&exhausted, ClientEvent::Error(e) if e.is_terminal()));

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(sub.try_recv(), None);
        assert_eq!(connector.open_attempts(), 10);
        assert_eq!(engine.reconnect_attempts(), 10);
        assert!(!engine.reconnect_pending());
        assert_eq!(engine.phase(), SessionPhase::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_reasons_never_reconnect() {
        for (reason, kind) in [
            (DisconnectReason::LoggedOut, SessionErrorKind::LoggedOut),
            (DisconnectReason::ProtocolRejected, SessionErrorKind::ProtocolRejected),
        ] {
            let tmp = TempDir::new().unwrap();
            let (engine, connector, mut sub) = setup(&tmp);
            open_session(&engine, &connector, &mut sub).await;

            connector.emit(closed(reason));
            assert_eq!(next(&mut sub).await, ClientEvent::Connection(ConnectionStatus::Close));
            assert_eq!(error_kind(&next(&mut sub).await), Some(kind));

            tokio::time::sleep(Duration::from_secs(600)).await;
            assert_eq!(sub.try_recv(), None, "no reconnect after {kind:?}");
            assert_eq!(connector.open_attempts(), 1);
            assert_eq!(connector.socket(0).closes.load(Ordering::SeqCst), 1);
            assert_eq!(engine.phase(), SessionPhase::Closed);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pairing_timeout_retries_quickly_without_error() {
        let tmp = TempDir::new().unwrap();
        let (engine, connector, mut sub) = setup(&tmp);
        engine.connect().await.unwrap();
        next(&mut sub).await;

        let closed_at = Instant::now();
        connector.emit(closed(DisconnectReason::PairingTimeout));
        assert_eq!(next(&mut sub).await, ClientEvent::Connection(ConnectionStatus::Close));
        assert_eq!(
            next(&mut sub).await,
            ClientEvent::Connection(ConnectionStatus::Connecting)
        );
        let waited = closed_at.elapsed();
        assert!(waited >= Duration::from_secs(1) && waited < Duration::from_secs(2));
        assert_eq!(engine.reconnect_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_twice_emits_one_close() {
        let tmp = TempDir::new().unwrap();
        let (engine, connector, mut sub) = setup(&tmp);
        open_session(&engine, &connector, &mut sub).await;

        engine.disconnect().await;
        engine.disconnect().await;

        assert_eq!(sub.try_recv(), Some(ClientEvent::Connection(ConnectionStatus::Close)));
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(sub.try_recv(), None);
        assert_eq!(connector.socket(0).closes.load(Ordering::SeqCst), 1);
        assert_eq!(connector.open_attempts(), 1);
        assert_eq!(engine.phase(), SessionPhase::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_pending_reconnect() {
        let tmp = TempDir::new().unwrap();
        let (engine, connector, mut sub) = setup(&tmp);
        open_session(&engine, &connector, &mut sub).await;

        connector.emit(closed(DisconnectReason::Other("lost".to_string())));
        next(&mut sub).await;
        next(&mut sub).await;
        assert!(engine.reconnect_pending());

        engine.disconnect().await;
        assert!(!engine.reconnect_pending());
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(sub.try_recv(), None);
        assert_eq!(connector.open_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn events_from_superseded_socket_are_ignored() {
        let tmp = TempDir::new().unwrap();
        let (engine, connector, mut sub) = setup(&tmp);
        open_session(&engine, &connector, &mut sub).await;

        connector.emit(closed(DisconnectReason::Other("lost".to_string())));
        next(&mut sub).await;
        next(&mut sub).await;
        assert_eq!(
            next(&mut sub).await,
            ClientEvent::Connection(ConnectionStatus::Connecting)
        );
        settle().await;

        let stale = connector.opened.lock().unwrap()[0].events.clone();
        let _ = stale.send(opened());
        let _ = stale.send(closed(DisconnectReason::LoggedOut));
        settle().await;
        assert_eq!(sub.try_recv(), None);
        assert_eq!(engine.phase(), SessionPhase::Connecting);

        connector.emit(opened());
        assert_eq!(next(&mut sub).await, ClientEvent::Connection(ConnectionStatus::Open));
    }

    #[tokio::test(start_paused = true)]
    async fn credential_updates_are_saved_before_later_events() {
        let tmp = TempDir::new().unwrap();
        let (engine, connector, mut sub) = setup(&tmp);
        engine.connect().await.unwrap();
        next(&mut sub).await;

        let creds = json!({ "me": { "id": "15551234567:7@s.whatsapp.net" }, "registered": true });
        connector.emit(SocketEvent::CredentialsUpdated(CredentialState::from_value(
            creds.clone(),
        )));
        connector.emit(opened());
        assert_eq!(next(&mut sub).await, ClientEvent::Connection(ConnectionStatus::Open));

        let on_disk: serde_json::Value =
            serde_json::from_slice(&std::fs::read(engine.credentials().credentials_path()).unwrap())
                .unwrap();
        assert_eq!(on_disk, creds);
    }

    #[tokio::test(start_paused = true)]
    async fn credential_save_failure_is_terminal() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("auth");
        let connector = Arc::new(MockConnector::default());
        let engine = SessionEngine::new(&settings(&dir), connector.clone());
        let mut sub = engine.subscribe();
        open_session(&engine, &connector, &mut sub).await;

        // A plain file where the session directory should be.
        std::fs::remove_dir_all(&dir).unwrap();
        std::fs::write(&dir, b"not a directory").unwrap();

        connector.emit(SocketEvent::CredentialsUpdated(CredentialState::from_value(
            json!({ "rev": 2 }),
        )));
        let err = next(&mut sub).await;
        assert_eq!(error_kind(&err), Some(SessionErrorKind::CredentialPersistence));
        assert_eq!(next(&mut sub).await, ClientEvent::Connection(ConnectionStatus::Close));

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(sub.try_recv(), None);
        assert_eq!(connector.open_attempts(), 1);
        assert_eq!(engine.phase(), SessionPhase::Closed);
    }
}

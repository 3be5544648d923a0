// ABOUTME: Async driver for a chat session
// ABOUTME: Owns the transport, feeds stream frames into the session, and notifies callbacks

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::ClientConfig;
use crate::error::SessionError;
use crate::event::ChatEvent;
use crate::models::*;
use crate::pipeline::PipelineState;
use crate::session::{ChatSession, Epoch, Ingest};
use crate::transport::{FrameReceiver, FrameSender, Transport, WebSocketTransport};
use crate::{StateCallback, StreamCallback};

/// Lower bound on how often an in-flight turn is checked for a stall
const MIN_STALL_CHECK: Duration = Duration::from_millis(50);

/// Internal state for the live connection
struct ActiveLink {
    epoch: Epoch,
    cancel: CancellationToken,
    sender: FrameSender,
}

/// Internal client state
struct ClientState {
    session: ChatSession,
    link: Option<ActiveLink>,

    // Callbacks
    stream_callback: Option<Box<dyn StreamCallback>>,
    state_callback: Option<Box<dyn StateCallback>>,
}

/// What the state callback last saw, for change detection
struct Observed {
    status: ConnectionStatus,
    connection_error: Option<String>,
    messages: usize,
    is_streaming: bool,
    pending: Option<PendingRequest>,
    pipeline: PipelineState,
}

impl Observed {
    fn capture(session: &ChatSession) -> Self {
        Self {
            status: session.status(),
            connection_error: session.connection_error().map(str::to_string),
            messages: session.messages().len(),
            is_streaming: session.is_streaming(),
            pending: session.pending_request().cloned(),
            pipeline: session.pipeline(),
        }
    }
}

/// Fails a connection attempt whose `connect` future is dropped before the
/// handshake settles, so the session does not stay `Connecting`.
struct PendingConnect<'a, T: Transport> {
    client: &'a ChatClient<T>,
    epoch: Epoch,
    armed: bool,
}

impl<T: Transport> PendingConnect<'_, T> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<T: Transport> Drop for PendingConnect<'_, T> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let epoch = self.epoch;
        tracing::debug!(%epoch, "connect cancelled before handshake finished");
        ChatClient::<T>::update(&self.client.state, |session| {
            session.connection_failed(epoch, "connect cancelled".to_string())
        });
    }
}

/// A chat session bound to one agent stream endpoint.
///
/// `send` and `disconnect` are synchronous; `connect` awaits the handshake.
/// Inbound frames are processed on a background task for as long as the
/// connection lives.
pub struct ChatClient<T: Transport = WebSocketTransport> {
    session_id: String,
    endpoint: Url,
    connect_timeout: Duration,
    transport: Arc<T>,
    state: Arc<RwLock<ClientState>>,
}

impl ChatClient<WebSocketTransport> {
    /// Create a client for the WebSocket endpoint described by `config`.
    pub fn new(config: &ClientConfig) -> Result<Self, SessionError> {
        Self::with_transport(config, WebSocketTransport)
    }
}

impl<T: Transport> ChatClient<T> {
    /// Create a client over a custom transport.
    pub fn with_transport(config: &ClientConfig, transport: T) -> Result<Self, SessionError> {
        config.validate()?;
        let session_id = config
            .gateway
            .session_id
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let endpoint = config.stream_url(&session_id)?;

        tracing::debug!(%endpoint, "chat client created");

        Ok(Self {
            session_id,
            endpoint,
            connect_timeout: config.connect_timeout(),
            transport: Arc::new(transport),
            state: Arc::new(RwLock::new(ClientState {
                session: ChatSession::new(config.session_config()),
                link: None,
                stream_callback: None,
                state_callback: None,
            })),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Set callback for stream events
    pub fn set_stream_callback(&self, callback: Box<dyn StreamCallback>) {
        self.state.write().expect("lock poisoned").stream_callback = Some(callback);
    }

    /// Set callback for state changes
    pub fn set_state_callback(&self, callback: Box<dyn StateCallback>) {
        self.state.write().expect("lock poisoned").state_callback = Some(callback);
    }

    // =========================================================================
    // Connection
    // =========================================================================

    /// Open the stream. A no-op while already connecting or connected.
    ///
    /// Fails with `SessionError::Closed` if `disconnect` was called before the
    /// handshake finished; the late connection is dropped.
    pub async fn connect(&self) -> Result<(), SessionError> {
        let Some(epoch) = Self::update(&self.state, |session| session.begin_connect()) else {
            return Ok(());
        };
        let mut pending = PendingConnect {
            client: self,
            epoch,
            armed: true,
        };

        let opened = match tokio::time::timeout(
            self.connect_timeout,
            self.transport.open(&self.endpoint),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SessionError::Connection(format!(
                "timed out after {}s",
                self.connect_timeout.as_secs()
            ))),
        };

        // From here on the attempt settles without yielding
        pending.disarm();

        let connection = match opened {
            Ok(connection) => connection,
            Err(e) => {
                Self::update(&self.state, |session| {
                    session.connection_failed(epoch, e.to_string())
                });
                return Err(e);
            }
        };

        let cancel = CancellationToken::new();
        let stall_timeout = {
            let mut state_guard = self.state.write().expect("lock poisoned");
            let before = Observed::capture(&state_guard.session);
            if !state_guard.session.connection_opened(epoch) {
                return Err(SessionError::Closed);
            }
            state_guard.link = Some(ActiveLink {
                epoch,
                cancel: cancel.clone(),
                sender: connection.sender,
            });
            Self::notify_changes(&state_guard, before);
            state_guard.session.config().stall_timeout
        };

        tracing::info!(%epoch, endpoint = %self.endpoint, "connected to agent stream");

        tokio::spawn(Self::run_connection(
            self.state.clone(),
            epoch,
            connection.receiver,
            cancel,
            stall_timeout,
        ));

        Ok(())
    }

    /// Close the stream. Any in-flight turn is finalized with an error marker
    /// and events still in transit are discarded. Safe to call repeatedly.
    pub fn disconnect(&self) {
        let mut state_guard = self.state.write().expect("lock poisoned");
        let before = Observed::capture(&state_guard.session);
        if let Some(link) = state_guard.link.take() {
            link.cancel.cancel();
        }
        state_guard.session.disconnect();
        Self::notify_changes(&state_guard, before);
    }

    /// Drop the current connection and open a fresh one.
    pub async fn reconnect(&self) -> Result<(), SessionError> {
        self.disconnect();
        self.connect().await
    }

    // =========================================================================
    // Turns
    // =========================================================================

    /// Send a user message and start streaming the reply.
    ///
    /// Rejected without side effects when the text is blank, when a turn is
    /// already in flight, or when not connected.
    pub fn send(&self, text: &str) -> Result<(), SessionError> {
        let mut state_guard = self.state.write().expect("lock poisoned");
        let before = Observed::capture(&state_guard.session);

        let (epoch, frame) = state_guard.session.begin_turn(text)?;
        let sent = match state_guard.link.as_ref().filter(|l| l.epoch == epoch) {
            Some(link) => link.sender.send(&frame),
            None => Err(SessionError::NotConnected),
        };
        if let Err(e) = &sent {
            tracing::warn!(%epoch, error = %e, "failed to write user message");
            state_guard.session.turn_failed(epoch, e.to_string());
        }

        Self::notify_changes(&state_guard, before);
        sent
    }

    // =========================================================================
    // Read access
    // =========================================================================

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.read().expect("lock poisoned").session.snapshot()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.read().expect("lock poisoned").session.status()
    }

    pub fn is_streaming(&self) -> bool {
        self.state.read().expect("lock poisoned").session.is_streaming()
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.state
            .read()
            .expect("lock poisoned")
            .session
            .messages()
            .to_vec()
    }

    pub fn streaming_text(&self) -> String {
        self.state
            .read()
            .expect("lock poisoned")
            .session
            .streaming_text()
            .to_string()
    }

    pub fn pending_request(&self) -> Option<PendingRequest> {
        self.state
            .read()
            .expect("lock poisoned")
            .session
            .pending_request()
            .cloned()
    }

    pub fn pipeline(&self) -> PipelineState {
        self.state.read().expect("lock poisoned").session.pipeline()
    }

    pub fn events(&self) -> Vec<ChatEvent> {
        self.state
            .read()
            .expect("lock poisoned")
            .session
            .events()
            .cloned()
            .collect()
    }

    // =========================================================================
    // Internal Streaming Implementation
    // =========================================================================

    /// Pump frames for one connection until it ends or is cancelled.
    async fn run_connection(
        state: Arc<RwLock<ClientState>>,
        epoch: Epoch,
        mut receiver: FrameReceiver,
        cancel: CancellationToken,
        stall_timeout: Duration,
    ) {
        let mut ticker = tokio::time::interval((stall_timeout / 4).max(MIN_STALL_CHECK));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break;
                }
                _ = ticker.tick() => {
                    if Self::handle_tick(&state, epoch) {
                        break;
                    }
                }
                frame = receiver.recv() => {
                    match frame {
                        Some(Ok(text)) => match ChatEvent::parse(&text) {
                            Ok(event) => Self::handle_event(&state, epoch, event),
                            Err(e) => {
                                tracing::warn!(%epoch, error = %e, "dropping malformed frame");
                            }
                        },
                        Some(Err(e)) => {
                            Self::handle_connection_lost(&state, epoch, Some(e));
                            break;
                        }
                        None => {
                            Self::handle_connection_lost(&state, epoch, None);
                            break;
                        }
                    }
                }
            }
        }

        tracing::debug!(%epoch, "connection task finished");
    }

    fn handle_event(state: &Arc<RwLock<ClientState>>, epoch: Epoch, event: ChatEvent) {
        let mut state_guard = state.write().expect("lock poisoned");
        let before = Observed::capture(&state_guard.session);

        let applied = state_guard.session.ingest(epoch, event.clone());
        if applied == Ingest::Applied {
            if let Some(cb) = &state_guard.stream_callback {
                cb.on_event(event);
            }
        }

        Self::notify_changes(&state_guard, before);
    }

    /// Returns true when the turn stalled and the connection was failed.
    fn handle_tick(state: &Arc<RwLock<ClientState>>, epoch: Epoch) -> bool {
        let mut state_guard = state.write().expect("lock poisoned");
        let before = Observed::capture(&state_guard.session);

        let stalled = state_guard.session.check_stall(epoch, Instant::now());
        if stalled {
            Self::release_link(&mut state_guard, epoch);
        }

        Self::notify_changes(&state_guard, before);
        stalled
    }

    fn handle_connection_lost(
        state: &Arc<RwLock<ClientState>>,
        epoch: Epoch,
        error: Option<SessionError>,
    ) {
        let mut state_guard = state.write().expect("lock poisoned");
        let before = Observed::capture(&state_guard.session);

        let current = match error {
            Some(e) => state_guard.session.connection_failed(epoch, e.to_string()),
            None => state_guard.session.connection_closed(epoch),
        };
        if current {
            Self::release_link(&mut state_guard, epoch);
            tracing::warn!(
                %epoch,
                error = state_guard.session.connection_error().unwrap_or_default(),
                "agent stream lost"
            );
        }

        Self::notify_changes(&state_guard, before);
    }

    /// Drop the link for `epoch`, which closes its outbound side.
    fn release_link(state: &mut ClientState, epoch: Epoch) {
        if state.link.as_ref().is_some_and(|l| l.epoch == epoch) {
            if let Some(link) = state.link.take() {
                link.cancel.cancel();
            }
        }
    }

    /// Run `f` against the session under the lock and report what changed.
    fn update<R>(state: &Arc<RwLock<ClientState>>, f: impl FnOnce(&mut ChatSession) -> R) -> R {
        let mut state_guard = state.write().expect("lock poisoned");
        let before = Observed::capture(&state_guard.session);
        let result = f(&mut state_guard.session);
        Self::notify_changes(&state_guard, before);
        result
    }

    fn notify_changes(state: &ClientState, before: Observed) {
        let Some(cb) = &state.state_callback else {
            return;
        };
        let session = &state.session;

        if session.status() != before.status
            || session.connection_error() != before.connection_error.as_deref()
        {
            cb.on_connection_status(
                session.status(),
                session.connection_error().map(str::to_string),
            );
        }
        if session.messages().len() != before.messages {
            cb.on_messages_changed(session.messages().len());
        }
        if session.is_streaming() != before.is_streaming {
            cb.on_streaming_changed(session.is_streaming());
        }
        if session.pending_request() != before.pending.as_ref() {
            cb.on_pending_changed(session.pending_request().cloned());
        }
        let pipeline = session.pipeline();
        if pipeline != before.pipeline {
            cb.on_pipeline_changed(pipeline);
        }
    }
}

impl<T: Transport> Drop for ChatClient<T> {
    fn drop(&mut self) {
        if let Ok(mut state_guard) = self.state.write() {
            if let Some(link) = state_guard.link.take() {
                link.cancel.cancel();
            }
        }
    }
}

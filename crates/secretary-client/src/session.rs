// ABOUTME: Chat stream session state machine
// ABOUTME: Transcript, token accumulator, clarification slot, event log, and epoch checks with no I/O

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::error::SessionError;
use crate::event::{ChatEvent, ClientFrame, PendingUpdate, TurnOutcome};
use crate::models::{
    ActionStatus, ChatAction, ChatMessage, ConnectionStatus, PendingRequest, SessionSnapshot,
};
use crate::pipeline::PipelineState;

/// Default time a turn may go without any event before it is declared stalled
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of events kept in the log
pub const DEFAULT_EVENT_LOG_LIMIT: usize = 500;

/// Generation tag of a connection attempt. Events carry the epoch of the
/// connection that delivered them and are dropped once it is no longer current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Epoch(u64);

impl Epoch {
    fn next(self) -> Self {
        Epoch(self.0 + 1)
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tunables for a session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub stall_timeout: Duration,
    /// Maximum events retained; 0 keeps everything
    pub event_log_limit: usize,
    /// Attached to every outbound user message
    pub tenant_id: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            stall_timeout: DEFAULT_STALL_TIMEOUT,
            event_log_limit: DEFAULT_EVENT_LOG_LIMIT,
            tenant_id: None,
        }
    }
}

/// Result of offering an inbound event to the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingest {
    Applied,
    /// From a connection that is no longer current
    Stale,
    /// Valid but meaningless in the current state (e.g. `done` with no turn)
    Ignored,
}

/// The in-flight turn
#[derive(Debug)]
struct Turn {
    text: String,
    actions: Vec<ChatAction>,
    last_activity: Instant,
}

/// One logical conversation.
///
/// All mutation goes through methods on this type; the async client calls them
/// under a single lock so they never interleave.
#[derive(Debug)]
pub struct ChatSession {
    config: SessionConfig,
    epoch: Epoch,
    status: ConnectionStatus,
    connection_error: Option<String>,
    messages: Vec<ChatMessage>,
    turn: Option<Turn>,
    pending_request: Option<PendingRequest>,
    events: VecDeque<ChatEvent>,
    /// How many events at the tail of the log belong to the in-flight turn
    turn_events: usize,
    last_timestamp: Option<DateTime<Utc>>,
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl ChatSession {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            epoch: Epoch(0),
            status: ConnectionStatus::Disconnected,
            connection_error: None,
            messages: vec![],
            turn: None,
            pending_request: None,
            events: VecDeque::new(),
            turn_events: 0,
            last_timestamp: None,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn connection_error(&self) -> Option<&str> {
        self.connection_error.as_deref()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn pending_request(&self) -> Option<&PendingRequest> {
        self.pending_request.as_ref()
    }

    pub fn is_streaming(&self) -> bool {
        self.turn.is_some()
    }

    /// Partial assistant text of the in-flight turn.
    pub fn streaming_text(&self) -> &str {
        self.turn.as_ref().map(|t| t.text.as_str()).unwrap_or("")
    }

    pub fn events(&self) -> impl Iterator<Item = &ChatEvent> {
        self.events.iter()
    }

    /// Pipeline progress of the in-flight turn, folded from its events.
    pub fn pipeline(&self) -> PipelineState {
        let start = self.events.len() - self.turn_events;
        PipelineState::fold(self.events.iter().skip(start))
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            messages: self.messages.clone(),
            streaming_text: self.streaming_text().to_string(),
            pending_request: self.pending_request.clone(),
            connecting: self.status == ConnectionStatus::Connecting,
            connection_error: self.connection_error.clone(),
            events: self.events.iter().cloned().collect(),
            status: self.status,
            is_streaming: self.is_streaming(),
            pipeline: self.pipeline(),
        }
    }

    // =========================================================================
    // Connection lifecycle
    // =========================================================================

    /// Start a connection attempt. Returns `None` while already connecting or
    /// connected; otherwise the epoch the new connection must report with.
    pub fn begin_connect(&mut self) -> Option<Epoch> {
        match self.status {
            ConnectionStatus::Connecting | ConnectionStatus::Connected => None,
            ConnectionStatus::Disconnected | ConnectionStatus::Error => {
                self.epoch = self.epoch.next();
                self.status = ConnectionStatus::Connecting;
                self.connection_error = None;
                tracing::debug!(epoch = %self.epoch, "connecting");
                Some(self.epoch)
            }
        }
    }

    /// The transport for `epoch` is open. Returns false if the attempt was
    /// superseded, in which case the caller must drop the connection.
    pub fn connection_opened(&mut self, epoch: Epoch) -> bool {
        if epoch != self.epoch || self.status != ConnectionStatus::Connecting {
            tracing::debug!(%epoch, current = %self.epoch, "discarding superseded connection");
            return false;
        }
        self.status = ConnectionStatus::Connected;
        tracing::debug!(%epoch, "connected");
        true
    }

    /// The transport for `epoch` failed to open or broke.
    pub fn connection_failed(&mut self, epoch: Epoch, message: String) -> bool {
        if epoch != self.epoch || !self.is_live() {
            return false;
        }
        tracing::warn!(%epoch, error = %message, "connection failed");
        self.abandon_turn(&message);
        self.status = ConnectionStatus::Error;
        self.connection_error = Some(message);
        true
    }

    /// The remote end closed the transport for `epoch`.
    pub fn connection_closed(&mut self, epoch: Epoch) -> bool {
        self.connection_failed(epoch, "connection closed by agent service".to_string())
    }

    /// Release the connection. Invalidates the current epoch so late events and
    /// late connection results are ignored. Safe to call in any state.
    pub fn disconnect(&mut self) -> bool {
        let was_live = self.is_live();
        self.epoch = self.epoch.next();
        self.abandon_turn("disconnected");
        self.status = ConnectionStatus::Disconnected;
        self.connection_error = None;
        if was_live {
            tracing::debug!(epoch = %self.epoch, "disconnected");
        }
        was_live
    }

    fn is_live(&self) -> bool {
        matches!(
            self.status,
            ConnectionStatus::Connecting | ConnectionStatus::Connected
        )
    }

    // =========================================================================
    // Turns
    // =========================================================================

    /// Append the user's message and open a turn. Returns the frame to write
    /// on the connection for the returned epoch.
    ///
    /// Rejections (`EmptyMessage`, `Busy`, `NotConnected`) leave state untouched.
    pub fn begin_turn(&mut self, text: &str) -> Result<(Epoch, ClientFrame), SessionError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        if self.turn.is_some() {
            return Err(SessionError::Busy);
        }
        if self.status != ConnectionStatus::Connected {
            return Err(SessionError::NotConnected);
        }

        let created_at = self.next_timestamp();
        self.messages
            .push(ChatMessage::user(text.to_string(), created_at));
        self.turn = Some(Turn {
            text: String::new(),
            actions: vec![],
            last_activity: Instant::now(),
        });
        self.turn_events = 0;
        self.connection_error = None;

        tracing::debug!(epoch = %self.epoch, len = text.len(), "turn started");

        Ok((
            self.epoch,
            ClientFrame::UserMessage {
                message: text.to_string(),
                tenant_id: self.config.tenant_id.clone(),
            },
        ))
    }

    /// The outbound frame for the in-flight turn could not be written.
    pub fn turn_failed(&mut self, epoch: Epoch, message: String) -> bool {
        if epoch != self.epoch || self.turn.is_none() {
            return false;
        }
        self.abandon_turn(&message);
        self.connection_error = Some(message);
        true
    }

    /// Apply one inbound event delivered by the connection for `epoch`.
    pub fn ingest(&mut self, epoch: Epoch, event: ChatEvent) -> Ingest {
        if epoch != self.epoch || self.status != ConnectionStatus::Connected {
            tracing::trace!(
                %epoch,
                current = %self.epoch,
                kind = event.kind(),
                "stale event dropped"
            );
            return Ingest::Stale;
        }

        if let Some(turn) = self.turn.as_mut() {
            turn.last_activity = Instant::now();
        }

        match event {
            ChatEvent::Token { text } => match self.turn.as_mut() {
                Some(turn) => {
                    turn.text.push_str(&text);
                    Ingest::Applied
                }
                None => {
                    tracing::warn!(len = text.len(), "token outside of a turn ignored");
                    Ingest::Ignored
                }
            },
            ChatEvent::Done(outcome) => {
                if self.turn.is_none() {
                    tracing::debug!("done outside of a turn ignored");
                    return Ingest::Ignored;
                }
                let logged = ChatEvent::Done(outcome.clone());
                self.log_event(logged);
                self.finish_turn(outcome);
                Ingest::Applied
            }
            ChatEvent::Error { message } => {
                self.log_event(ChatEvent::Error {
                    message: message.clone(),
                });
                tracing::warn!(error = %message, "agent reported error");
                self.abandon_turn(&message);
                self.connection_error = Some(message);
                Ingest::Applied
            }
            ChatEvent::PendingRequest { pending } => {
                self.pending_request = pending.clone().filter(PendingRequest::is_open);
                self.log_event(ChatEvent::PendingRequest { pending });
                Ingest::Applied
            }
            event => {
                self.track_action(&event);
                self.log_event(event);
                Ingest::Applied
            }
        }
    }

    /// Fail the connection if the in-flight turn has been silent for the stall
    /// timeout. Turns carry no id on the wire, so late frames for the abandoned
    /// turn could not be told apart from the next one; the caller must reconnect.
    pub fn check_stall(&mut self, epoch: Epoch, now: Instant) -> bool {
        if epoch != self.epoch || self.status != ConnectionStatus::Connected {
            return false;
        }
        let stalled = match &self.turn {
            Some(turn) => {
                now.saturating_duration_since(turn.last_activity) >= self.config.stall_timeout
            }
            None => false,
        };
        if stalled {
            let message = format!(
                "no response from agent for {}s",
                self.config.stall_timeout.as_secs()
            );
            tracing::warn!(%epoch, "turn stalled");
            self.connection_failed(epoch, message);
        }
        stalled
    }

    fn track_action(&mut self, event: &ChatEvent) {
        let Some(turn) = self.turn.as_mut() else {
            return;
        };
        match event {
            ChatEvent::ToolCall { service, path } => {
                let payload = path.as_ref().map(|p| json!({ "path": p }));
                turn.actions
                    .push(ChatAction::running(service.clone(), payload));
            }
            ChatEvent::ToolResult { service, result } => {
                if let Some(action) = running_action(&mut turn.actions, service) {
                    action.status = result
                        .get("status")
                        .and_then(|s| s.as_str())
                        .map(ActionStatus::from_backend)
                        .unwrap_or(ActionStatus::Completed);
                    action.result = Some(result.clone());
                }
            }
            ChatEvent::ToolError { service, error } => {
                if let Some(action) = running_action(&mut turn.actions, service) {
                    action.status = ActionStatus::Failed;
                    action.error = Some(error.clone());
                }
            }
            _ => {}
        }
    }

    fn finish_turn(&mut self, outcome: TurnOutcome) {
        let Some(turn) = self.turn.take() else {
            return;
        };
        self.turn_events = 0;

        let content = if turn.text.is_empty() {
            outcome.message.unwrap_or_default()
        } else {
            turn.text
        };
        let actions = match outcome.actions {
            Some(actions) if !actions.is_empty() => actions,
            _ => turn.actions,
        };
        self.pending_request = match outcome.pending {
            PendingUpdate::Replaced(pending) => Some(pending),
            PendingUpdate::Cleared => None,
            PendingUpdate::Unchanged => self.pending_request.take(),
        }
        .filter(PendingRequest::is_open);

        let created_at = self.next_timestamp();
        self.messages.push(ChatMessage::assistant(
            content,
            created_at,
            actions,
            self.pending_request.clone(),
        ));
        tracing::debug!(
            messages = self.messages.len(),
            pending = self.pending_request.is_some(),
            "turn finished"
        );
    }

    /// Finalize the in-flight turn with an error marker so its partial content
    /// stays visible in the transcript.
    fn abandon_turn(&mut self, reason: &str) {
        let Some(turn) = self.turn.take() else {
            return;
        };
        self.turn_events = 0;
        let created_at = self.next_timestamp();
        self.messages.push(ChatMessage::interrupted(
            turn.text,
            created_at,
            turn.actions,
            reason.to_string(),
        ));
        tracing::debug!(reason, "turn abandoned");
    }

    fn log_event(&mut self, event: ChatEvent) {
        if !event.is_logged() {
            return;
        }
        self.events.push_back(event);
        if self.turn.is_some() {
            self.turn_events += 1;
        }
        let limit = self.config.event_log_limit;
        if limit > 0 {
            while self.events.len() > limit {
                self.events.pop_front();
            }
        }
        self.turn_events = self.turn_events.min(self.events.len());
    }

    /// Wall-clock time, clamped so transcript timestamps never go backwards.
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let ts = match self.last_timestamp {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last_timestamp = Some(ts);
        ts
    }
}

fn running_action<'a>(actions: &'a mut [ChatAction], service: &str) -> Option<&'a mut ChatAction> {
    actions
        .iter_mut()
        .rev()
        .find(|a| a.action_type == service && !a.status.is_terminal())
}

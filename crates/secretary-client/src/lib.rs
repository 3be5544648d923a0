// ABOUTME: Streaming chat session library for the secretary agent backend
// ABOUTME: Session state machine, stream codec, transport, and the async client that drives them

mod client;
mod config;
mod error;
mod event;
mod models;
mod pipeline;
mod session;
mod transport;

pub use client::ChatClient;
pub use config::{ClientConfig, GatewayConfig, SessionSettings};
pub use error::SessionError;
pub use event::{ChatEvent, ClientFrame, PendingUpdate, RouteSource, TurnOutcome};
pub use models::*;
pub use pipeline::{PipelineState, Stage, StageStatus};
pub use session::{ChatSession, Epoch, Ingest, SessionConfig};
pub use transport::{
    stream_url, Connection, FrameReceiver, FrameSender, Transport, WebSocketTransport,
};

// ============================================================================
// Callback Traits
// ============================================================================

/// Receives every event applied to the session, tokens included.
///
/// Called while the client holds its state lock: implementations must not
/// call back into the client.
pub trait StreamCallback: Send + Sync {
    fn on_event(&self, event: ChatEvent);
}

/// Receives coarse state changes for UI updates.
///
/// Same locking rule as [`StreamCallback`].
pub trait StateCallback: Send + Sync {
    fn on_connection_status(&self, _status: ConnectionStatus, _error: Option<String>) {}
    fn on_messages_changed(&self, _count: usize) {}
    fn on_streaming_changed(&self, _is_streaming: bool) {}
    fn on_pending_changed(&self, _pending: Option<PendingRequest>) {}
    fn on_pipeline_changed(&self, _pipeline: PipelineState) {}
}

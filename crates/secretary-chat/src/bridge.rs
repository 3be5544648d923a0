// ABOUTME: Bridges secretary-client callbacks to UiEvent.
// ABOUTME: Implements StreamCallback and StateCallback by forwarding onto an unbounded channel.

use secretary_client::{
    ChatClient, ChatEvent, ConnectionStatus, PendingRequest, PipelineState, StateCallback,
    StreamCallback, Transport,
};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Everything the front-end reacts to
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    Token(String),
    Event(ChatEvent),
    Status {
        status: ConnectionStatus,
        error: Option<String>,
    },
    MessagesChanged(usize),
    Streaming(bool),
    Pending(Option<PendingRequest>),
    Pipeline(PipelineState),
}

#[derive(Clone)]
pub struct ClientBridge {
    tx: UnboundedSender<UiEvent>,
}

impl ClientBridge {
    pub fn new(tx: UnboundedSender<UiEvent>) -> Self {
        Self { tx }
    }

    /// Install a bridge on `client` and return the receiving end.
    pub fn attach<T: Transport>(client: &ChatClient<T>) -> UnboundedReceiver<UiEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let bridge = Self::new(tx);
        client.set_stream_callback(Box::new(bridge.clone()));
        client.set_state_callback(Box::new(bridge));
        rx
    }
}

impl StreamCallback for ClientBridge {
    fn on_event(&self, event: ChatEvent) {
        let ui = match event {
            ChatEvent::Token { text } => UiEvent::Token(text),
            other => UiEvent::Event(other),
        };
        let _ = self.tx.send(ui);
    }
}

impl StateCallback for ClientBridge {
    fn on_connection_status(&self, status: ConnectionStatus, error: Option<String>) {
        let _ = self.tx.send(UiEvent::Status { status, error });
    }

    fn on_messages_changed(&self, count: usize) {
        let _ = self.tx.send(UiEvent::MessagesChanged(count));
    }

    fn on_streaming_changed(&self, is_streaming: bool) {
        let _ = self.tx.send(UiEvent::Streaming(is_streaming));
    }

    fn on_pending_changed(&self, pending: Option<PendingRequest>) {
        let _ = self.tx.send(UiEvent::Pending(pending));
    }

    fn on_pipeline_changed(&self, pipeline: PipelineState) {
        let _ = self.tx.send(UiEvent::Pipeline(pipeline));
    }
}

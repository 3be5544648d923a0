// ABOUTME: Transport seam between the session and the agent stream
// ABOUTME: Opens bidirectional text-frame connections; WebSocket implementation over tokio-tungstenite

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::error::SessionError;
use crate::event::ClientFrame;

/// Default outbound queue depth for a connection
const OUTBOUND_BUFFER: usize = 16;

/// Inbound queue depth; the reader waits when the session falls behind
const INBOUND_BUFFER: usize = 256;

/// How long the writer waits for the close handshake to go out
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Writes frames onto an open connection.
#[derive(Debug, Clone)]
pub struct FrameSender {
    tx: mpsc::Sender<String>,
}

impl FrameSender {
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self { tx }
    }

    /// Queue a frame without waiting. Fails if the writer has gone away or is
    /// backed up.
    pub fn send(&self, frame: &ClientFrame) -> Result<(), SessionError> {
        let text = frame.encode()?;
        self.tx.try_send(text).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                SessionError::Transport("outbound queue is full".into())
            }
            mpsc::error::TrySendError::Closed(_) => SessionError::Closed,
        })
    }
}

/// Reads raw text frames from an open connection. Aborts the tasks tied to it
/// when dropped.
#[derive(Debug)]
pub struct FrameReceiver {
    rx: mpsc::Receiver<Result<String, SessionError>>,
    tasks: Vec<JoinHandle<()>>,
}

impl FrameReceiver {
    pub fn new(rx: mpsc::Receiver<Result<String, SessionError>>) -> Self {
        Self { rx, tasks: vec![] }
    }

    /// Tie a background task's lifetime to this receiver.
    pub fn with_task(mut self, task: JoinHandle<()>) -> Self {
        self.tasks.push(task);
        self
    }

    /// Next frame, an error that ends the connection, or `None` once the
    /// remote side has closed.
    pub async fn recv(&mut self) -> Option<Result<String, SessionError>> {
        self.rx.recv().await
    }
}

impl Drop for FrameReceiver {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// An open stream to the agent service
#[derive(Debug)]
pub struct Connection {
    pub sender: FrameSender,
    pub receiver: FrameReceiver,
}

/// Opens connections to the agent stream endpoint.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn open(&self, url: &Url) -> Result<Connection, SessionError>;
}

/// WebSocket transport used against the real backend
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport;

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, url: &Url) -> Result<Connection, SessionError> {
        let (socket, response) = tokio_tungstenite::connect_async(url.as_str()).await?;
        tracing::debug!(%url, status = %response.status(), "websocket handshake complete");

        let (mut sink, mut stream) = socket.split();
        let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);
        let (in_tx, in_rx) = mpsc::channel(INBOUND_BUFFER);

        // The writer holds only a weak handle so the receiver still observes
        // the end of the stream when the reader finishes first. It is not tied
        // to the receiver: it runs until every FrameSender is gone, then sends
        // a Close frame.
        let error_tx = in_tx.downgrade();
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(text)).await {
                    tracing::warn!(error = %e, "websocket write failed");
                    if let Some(tx) = error_tx.upgrade() {
                        let _ = tx.send(Err(SessionError::from(e))).await;
                    }
                    return;
                }
            }
            match tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await {
                Ok(Ok(())) => tracing::debug!("websocket closed"),
                Ok(Err(e)) => tracing::debug!(error = %e, "websocket close failed"),
                Err(_) => tracing::debug!("websocket close timed out"),
            }
        });

        let reader = tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                let item = match message {
                    Ok(Message::Text(text)) => Ok(text),
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => Ok(text),
                        Err(_) => {
                            tracing::warn!("dropping non-UTF-8 binary frame");
                            continue;
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        tracing::debug!(?frame, "websocket closed by peer");
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => Err(SessionError::from(e)),
                };
                let fatal = item.is_err();
                if in_tx.send(item).await.is_err() || fatal {
                    break;
                }
            }
        });

        Ok(Connection {
            sender: FrameSender::new(out_tx),
            receiver: FrameReceiver::new(in_rx).with_task(reader),
        })
    }
}

/// Build the stream endpoint for a session.
///
/// `http`/`https` gateways map to `ws`/`wss`; `stream_path` is appended to the
/// gateway's own path and the session id is carried as a query parameter.
pub fn stream_url(gateway: &str, stream_path: &str, session_id: &str) -> Result<Url, SessionError> {
    let mut url = Url::parse(gateway.trim())?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(SessionError::InvalidUrl(format!(
                "unsupported scheme `{}`",
                other
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| SessionError::InvalidUrl(format!("cannot use scheme `{}`", scheme)))?;

    let path = format!(
        "{}/{}",
        url.path().trim_end_matches('/'),
        stream_path.trim_start_matches('/')
    );
    url.set_path(&path);
    url.set_fragment(None);
    url.query_pairs_mut().append_pair("session_id", session_id);

    Ok(url)
}

// ABOUTME: Error types for secretary-client
// ABOUTME: One enum covers transport, turn, config, and event decoding failures

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors that can occur in secretary-client operations
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection closed")]
    Closed,

    #[error("A turn is already in flight")]
    Busy,

    #[error("Message is empty")]
    EmptyMessage,

    #[error("Not connected")]
    NotConnected,

    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    #[error("Invalid gateway URL: {0}")]
    InvalidUrl(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Whether this error rejects a `send` without touching session state.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            SessionError::Busy | SessionError::EmptyMessage | SessionError::NotConnected
        )
    }
}

impl From<tungstenite::Error> for SessionError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                SessionError::Closed
            }
            tungstenite::Error::Io(e) => SessionError::Connection(e.to_string()),
            tungstenite::Error::Url(e) => SessionError::InvalidUrl(e.to_string()),
            tungstenite::Error::Http(response) => {
                SessionError::Connection(format!("handshake rejected: HTTP {}", response.status()))
            }
            other => SessionError::Transport(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::MalformedEvent(err.to_string())
    }
}

impl From<url::ParseError> for SessionError {
    fn from(err: url::ParseError) -> Self {
        SessionError::InvalidUrl(err.to_string())
    }
}

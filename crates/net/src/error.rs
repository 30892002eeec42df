//! Network error types

use std::time::Duration;

use tokio_tungstenite::tungstenite;

/// Network result type
pub type Result<T> = std::result::Result<T, Error>;

/// Network errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Dialing or the WebSocket handshake failed
    #[error("Connection failed: {0}")]
    Connect(#[source] tungstenite::Error),

    /// Dialing, the handshake or the join did not finish in time
    #[error("Connection timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("Socket did not close within {0:?}")]
    CloseTimeout(Duration),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Handler failed: {0}")]
    Handler(#[from] HandlerError),

    #[error("Not connected")]
    NotConnected,

    #[error("Session stopped")]
    Stopped,
}

/// Error raised by a registered event handler
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl From<String> for HandlerError {
    fn from(msg: String) -> Self {
        Self(msg)
    }
}

impl From<&str> for HandlerError {
    fn from(msg: &str) -> Self {
        Self(msg.to_string())
    }
}

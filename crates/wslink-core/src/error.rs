//! Error types for wslink-core.

use thiserror::Error;

/// Errors surfaced by a WebSocket connection.
///
/// `InvalidState` and `InvalidArgument` are returned synchronously from the
/// offending call. `Transport` only ever arrives asynchronously, through an
/// `OnError` event or a failed send completion.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WsError {
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("No tokio runtime available")]
    NoRuntime,
}

impl WsError {
    /// Check if this error was caused by calling an operation in the wrong state.
    #[must_use]
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState(_))
    }

    /// Check if this error came from the transport.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Result type alias for connection operations.
pub type WsResult<T> = Result<T, WsError>;

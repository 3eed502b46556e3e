//! Client-side error types

use thiserror::Error;

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The channel is down and could not be reattached.
    #[error("Channel disconnected")]
    Disconnected,

    /// The server answered the call with a failure.
    #[error("Call failed: {0}")]
    CallFailed(String),

    /// The server does not know the session or handle named in the call.
    #[error("Bad session: {0}")]
    BadSession(String),

    /// The operation is not legal in the pipeline's current state.
    #[error("Operation rejected in state {state}")]
    InvalidState { state: &'static str },

    #[error("Protocol error: {0}")]
    Protocol(#[from] playout_protocol::Error),

    #[error("Shared memory error: {0}")]
    SharedMemory(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

//! Error types shared by the board components.

use thiserror::Error;

use crate::drawing_log::Stamp;

/// Errors raised by the stroke model, drawing log and sync channel.
#[derive(Debug, Error)]
pub enum BoardError {
    /// API misuse, such as extending a sealed stroke. Never retried.
    #[error("Invalid state: {0}")]
    InvalidState(String),
    /// No transport is currently established.
    #[error("Not connected to the relay")]
    Disconnected,
    /// The outbound queue exceeded its size or age bound.
    #[error("Outbound queue overflow ({queued} events pending)")]
    Overflow { queued: usize },
    /// A remote event regressed a participant's logical clock.
    #[error("Ordering conflict: {stamp} does not advance past clock {current}")]
    OrderingConflict { stamp: Stamp, current: u64 },
    /// Wire data could not be decoded or failed validation.
    #[error("Malformed event: {0}")]
    Malformed(String),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Result type for board operations.
pub type BoardResult<T> = Result<T, BoardError>;

/// Transport-level errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Already connected")]
    AlreadyConnected,
    #[error("Not connected")]
    NotConnected,
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Send failed: {0}")]
    SendFailed(String),
    #[error("Connection failed: {0}")]
    ConnectFailed(String),
}

impl From<serde_json::Error> for BoardError {
    fn from(err: serde_json::Error) -> Self {
        BoardError::Malformed(err.to_string())
    }
}

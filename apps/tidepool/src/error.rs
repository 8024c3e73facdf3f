use std::time::Duration;

use thiserror::Error;

/// Failures opening or using a duplex link to a session stream.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("failed to connect: {0}")]
    Connect(String),
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
    #[error("link closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum ClientError {
    /// The session registry could not be reached (network, timeout or 5xx).
    #[error("session backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("session backend rejected the request ({status}): {message}")]
    BackendRejected { status: u16, message: String },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl ClientError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, ClientError::BackendUnavailable(_))
    }
}

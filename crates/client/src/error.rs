//! Error types for the client crate.

use std::time::Duration;

use protocol::ProtocolError;
use thiserror::Error;

/// Errors returned by [`ClientSessionBridge`](crate::ClientSessionBridge).
#[derive(Debug, Error)]
pub enum ClientError {
    /// The configuration cannot be used.
    #[error("invalid client configuration: {0}")]
    InvalidConfig(String),

    /// A connection could not be opened or failed while in use.
    #[error("connection error: {0}")]
    Connection(String),

    /// The ready marker was not observed in time.
    #[error("ready marker not received within {0:?}")]
    Timeout(Duration),

    /// The session has not signalled readiness.
    #[error("session is not ready for commands")]
    NotReady,

    /// The bridge observes a session and cannot submit commands.
    #[error("bridge is attached read-only")]
    ReadOnly,

    /// An envelope or event could not be encoded or decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ClientError::Connection(err.to_string())
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

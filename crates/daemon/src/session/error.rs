//! Errors raised by session operations.

use thiserror::Error;

use super::channel::ChannelId;

/// Errors that can occur during session operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// No open driver connection is attached to the session.
    #[error("no open driver connection in context {0:?}")]
    NoDriver(String),

    /// The session has been destroyed and accepts no further attachments.
    #[error("session destroyed in context {0:?}")]
    Destroyed(String),

    /// The output channel is closed or cannot keep up.
    #[error("output channel closed: {0}")]
    ChannelClosed(ChannelId),

    /// The process engine failed.
    #[error("process engine failure: {0}")]
    Engine(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            SessionError::NoDriver("c1".to_string()).to_string(),
            "no open driver connection in context \"c1\""
        );
        assert_eq!(
            SessionError::ChannelClosed("abc".to_string()).to_string(),
            "output channel closed: abc"
        );
    }
}

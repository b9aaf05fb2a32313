//! Output channels.
//!
//! An [`OutputChannel`] is the session-side handle of one consumer of
//! terminal output: a driver connection, a read-only observer, or the
//! output log. Each channel owns a bounded queue drained by its own writer
//! task, so a slow consumer never blocks the session or its peers. A send
//! that cannot be queued fails instead of blocking, and the session closes
//! that one channel.

use tokio::sync::mpsc;
use uuid::Uuid;

use super::error::SessionError;

/// Unique identifier for an output channel.
pub type ChannelId = String;

/// Default queue capacity of an output channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Statistics about a channel's message handling.
#[derive(Debug, Clone, Default)]
pub struct ChannelStats {
    /// Total messages queued successfully.
    pub messages_sent: u64,
    /// Total bytes queued successfully.
    pub bytes_sent: u64,
}

/// Session-side handle of one output consumer.
pub struct OutputChannel {
    /// Unique channel identifier.
    id: ChannelId,
    /// Sender feeding the consumer's writer task.
    tx: mpsc::Sender<Vec<u8>>,
    /// Statistics about message handling.
    stats: ChannelStats,
    /// Set once a send failed.
    failed: bool,
}

impl OutputChannel {
    /// Creates a new channel with a fresh identifier.
    ///
    /// Returns the channel and the receiver its writer task drains.
    pub fn new() -> (Self, mpsc::Receiver<Vec<u8>>) {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Creates a new channel with a specific queue capacity.
    pub fn with_capacity(capacity: usize) -> (Self, mpsc::Receiver<Vec<u8>>) {
        Self::with_id(Uuid::new_v4().to_string(), capacity)
    }

    /// Creates a new channel with a caller-chosen identifier.
    pub fn with_id(id: ChannelId, capacity: usize) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let channel = OutputChannel {
            id,
            tx,
            stats: ChannelStats::default(),
            failed: false,
        };
        (channel, rx)
    }

    /// Returns the channel ID.
    pub fn id(&self) -> &ChannelId {
        &self.id
    }

    /// Returns a clone of the current statistics.
    pub fn stats(&self) -> ChannelStats {
        self.stats.clone()
    }

    /// Returns whether the consumer side has gone away or a send failed.
    pub fn is_closed(&self) -> bool {
        self.failed || self.tx.is_closed()
    }

    /// Queues a chunk of output for the consumer.
    ///
    /// Never blocks. A full queue counts as a failed send, same as a closed
    /// one; once a send fails every later send fails too.
    pub fn send(&mut self, data: &[u8]) -> Result<(), SessionError> {
        if self.failed {
            return Err(SessionError::ChannelClosed(self.id.clone()));
        }

        match self.tx.try_send(data.to_vec()) {
            Ok(()) => {
                self.stats.messages_sent += 1;
                self.stats.bytes_sent += data.len() as u64;
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.failed = true;
                tracing::warn!(
                    channel_id = %self.id,
                    sent = self.stats.messages_sent,
                    "Output channel is full, closing it"
                );
                Err(SessionError::ChannelClosed(self.id.clone()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.failed = true;
                tracing::debug!(channel_id = %self.id, "Output channel closed");
                Err(SessionError::ChannelClosed(self.id.clone()))
            }
        }
    }
}

impl std::fmt::Debug for OutputChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputChannel")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_creation() {
        let (channel, _rx) = OutputChannel::with_id("driver-1".to_string(), 4);
        assert_eq!(channel.id(), "driver-1");
        assert!(!channel.is_closed());

        let stats = channel.stats();
        assert_eq!(stats.messages_sent, 0);
        assert_eq!(stats.bytes_sent, 0);
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let (a, _rx_a) = OutputChannel::new();
        let (b, _rx_b) = OutputChannel::new();
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn test_send_delivers_in_order() {
        let (mut channel, mut rx) = OutputChannel::with_capacity(8);

        channel.send(b"one").unwrap();
        channel.send(b"two").unwrap();

        assert_eq!(rx.recv().await.unwrap(), b"one");
        assert_eq!(rx.recv().await.unwrap(), b"two");

        let stats = channel.stats();
        assert_eq!(stats.messages_sent, 2);
        assert_eq!(stats.bytes_sent, 6);
    }

    #[test]
    fn test_full_queue_fails_and_stays_failed() {
        let (mut channel, mut rx) = OutputChannel::with_capacity(1);

        channel.send(b"first").unwrap();
        assert!(matches!(
            channel.send(b"second"),
            Err(SessionError::ChannelClosed(_))
        ));
        assert!(channel.is_closed());

        // Draining the queue does not revive the channel.
        assert_eq!(rx.try_recv().unwrap(), b"first");
        assert!(channel.send(b"third").is_err());
    }

    #[test]
    fn test_send_to_dropped_receiver_fails() {
        let (mut channel, rx) = OutputChannel::with_capacity(4);
        drop(rx);

        assert!(channel.is_closed());
        assert!(channel.send(b"data").is_err());
    }
}

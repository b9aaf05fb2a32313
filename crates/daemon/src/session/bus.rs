//! Per-session status event bus.
//!
//! Status listeners subscribe to a session and receive every status
//! transition published after their subscription, in publication order.
//! Each listener has its own unbounded queue; a listener whose receiver
//! was dropped is pruned on the next broadcast.

use std::collections::HashMap;

use protocol::StatusUpdateEvent;
use tokio::sync::mpsc;

/// Identifier of a status listener within one session.
pub type ListenerId = u64;

/// A subscription handed to a status listener.
#[derive(Debug)]
pub struct StatusSubscription {
    /// Identifier used to unsubscribe.
    pub id: ListenerId,
    /// Receives every event published after subscription.
    pub events: mpsc::UnboundedReceiver<StatusUpdateEvent>,
}

/// Fan-out of status events to the listeners of one session.
#[derive(Debug, Default)]
pub struct StatusEventBus {
    listeners: HashMap<ListenerId, mpsc::UnboundedSender<StatusUpdateEvent>>,
    next_id: ListenerId,
}

impl StatusEventBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new listener.
    pub fn subscribe(&mut self) -> StatusSubscription {
        let (tx, events) = mpsc::unbounded_channel();
        let id = self.next_id;
        self.next_id += 1;
        self.listeners.insert(id, tx);
        StatusSubscription { id, events }
    }

    /// Removes a listener. Returns false if it was not registered.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(&id).is_some()
    }

    /// Delivers an event to every registered listener.
    ///
    /// Returns the number of listeners that received it.
    pub fn broadcast(&mut self, event: &StatusUpdateEvent) -> usize {
        let before = self.listeners.len();
        self.listeners
            .retain(|_, tx| tx.send(event.clone()).is_ok());

        let pruned = before - self.listeners.len();
        if pruned > 0 {
            tracing::debug!(pruned, "Pruned closed status listeners");
        }
        self.listeners.len()
    }

    /// Returns the number of registered listeners.
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Returns true if no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Drops every listener, closing their queues.
    pub fn clear(&mut self) {
        self.listeners.clear();
    }
}

//! Session registry.
//!
//! Maps each context to its live session. The first reference to a context
//! creates the session; concurrent first references race on the map entry
//! and all observe the same instance. A destroyed session removes its own
//! entry, but only while the entry still maps to that same instance.

use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::terminal::{DestroyCallback, SessionId, SessionSettings, TerminalSession};
use crate::engine::ProcessEngine;

type SessionMap = DashMap<String, Arc<TerminalSession>>;

/// Thread-safe registry of sessions keyed by context.
pub struct SessionRegistry {
    sessions: Arc<SessionMap>,
    engine: Arc<dyn ProcessEngine>,
    settings: SessionSettings,
}

impl SessionRegistry {
    /// Creates an empty registry whose sessions use the given engine.
    pub fn new(engine: Arc<dyn ProcessEngine>, settings: SessionSettings) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            engine,
            settings,
        }
    }

    /// Returns the session of a context, creating it if absent.
    ///
    /// An entry left behind by a session that is already destroyed is
    /// replaced.
    pub fn get_or_create(&self, context: &str) -> Arc<TerminalSession> {
        match self.sessions.entry(context.to_string()) {
            Entry::Occupied(entry) if !entry.get().is_destroyed() => entry.get().clone(),
            Entry::Occupied(mut entry) => {
                let session = self.new_session(context);
                entry.insert(session.clone());
                session
            }
            Entry::Vacant(entry) => {
                let session = self.new_session(context);
                entry.insert(session.clone());
                session
            }
        }
    }

    /// Returns the live session of a context, if any.
    pub fn get(&self, context: &str) -> Option<Arc<TerminalSession>> {
        self.sessions
            .get(context)
            .map(|entry| entry.value().clone())
            .filter(|session| !session.is_destroyed())
    }

    /// Returns true if a live session exists for the context.
    pub fn contains(&self, context: &str) -> bool {
        self.get(context).is_some()
    }

    /// Removes the entry of a context if it maps to the given session.
    ///
    /// Returns true if an entry was removed.
    pub fn remove(&self, context: &str, session_id: &SessionId) -> bool {
        remove_matching(&self.sessions, context, session_id)
    }

    /// Returns the number of registered sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns true if no session is registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Returns the contexts that currently have a session.
    pub fn contexts(&self) -> Vec<String> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Destroys every session.
    pub async fn shutdown(&self) {
        // Collect first: destruction removes entries from the map.
        let sessions: Vec<Arc<TerminalSession>> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        tracing::info!(count = sessions.len(), "Destroying all sessions");
        for session in sessions {
            session.shutdown().await;
        }
        self.sessions.clear();
    }

    fn new_session(&self, context: &str) -> Arc<TerminalSession> {
        let weak: Weak<SessionMap> = Arc::downgrade(&self.sessions);
        let key = context.to_string();
        let on_destroy: DestroyCallback = Box::new(move |session_id: &SessionId| {
            if let Some(sessions) = weak.upgrade() {
                if remove_matching(&sessions, &key, session_id) {
                    tracing::debug!(context = %key, session_id = %session_id, "Session unregistered");
                }
            }
        });

        TerminalSession::new(
            context,
            Arc::clone(&self.engine),
            self.settings.clone(),
            Some(on_destroy),
        )
    }
}

fn remove_matching(sessions: &SessionMap, context: &str, session_id: &SessionId) -> bool {
    sessions
        .remove_if(context, |_, session| session.id() == session_id)
        .is_some()
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.sessions.len())
            .field("settings", &self.settings)
            .finish()
    }
}

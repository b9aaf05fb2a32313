//! Terminal sessions.
//!
//! A [`TerminalSession`] owns the engine of one context and the set of
//! channels attached to it: at most one driver, any number of read-only
//! observers, an optional output log, and the status listeners. All state
//! lives behind one async mutex, so every attach, detach, output write and
//! status change is applied atomically and in a single order.
//!
//! Engine events are drained by a pump task holding only a weak reference
//! to the session; output and status changes are therefore observed in the
//! order the engine produced them.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use protocol::{completion_marker, StatusUpdateEvent, TaskStatus};
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use super::bus::{ListenerId, StatusEventBus, StatusSubscription};
use super::channel::{ChannelId, OutputChannel, DEFAULT_CHANNEL_CAPACITY};
use super::error::SessionError;
use super::lifecycle::{DriverPresence, Effect, Lifecycle, LifecycleInput, Phase};
use super::output_log;
use crate::engine::{EngineControl, EngineEvent, ProcessEngine};

/// Unique identifier for a session instance.
pub type SessionId = String;

/// Called once when a session is destroyed, with the session's id.
pub type DestroyCallback = Box<dyn FnOnce(&SessionId) + Send>;

/// Per-session settings.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Queue capacity of the output log channel.
    pub channel_capacity: usize,
    /// Directory receiving one output log per context, if any.
    pub output_log_dir: Option<PathBuf>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            output_log_dir: None,
        }
    }
}

/// Result of asking to become the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    /// The channel is now the driver.
    Accepted,
    /// A driver was already open; the channel was attached read-only.
    BecameReadOnly,
}

struct SessionInner {
    lifecycle: Lifecycle,
    driver: Option<OutputChannel>,
    read_only: HashMap<ChannelId, OutputChannel>,
    output_log: Option<OutputChannel>,
    bus: StatusEventBus,
    engine: Option<EngineControl>,
    on_destroy: Option<DestroyCallback>,
}

/// One interactive command session, shared by the connections of a context.
pub struct TerminalSession {
    id: SessionId,
    context: String,
    settings: SessionSettings,
    engine: Arc<dyn ProcessEngine>,
    inner: Mutex<SessionInner>,
    destroyed: AtomicBool,
}

impl TerminalSession {
    /// Creates a session. The engine is started by the first driver.
    pub fn new(
        context: impl Into<String>,
        engine: Arc<dyn ProcessEngine>,
        settings: SessionSettings,
        on_destroy: Option<DestroyCallback>,
    ) -> Arc<Self> {
        let session = Arc::new(Self {
            id: Uuid::new_v4().to_string(),
            context: context.into(),
            settings,
            engine,
            inner: Mutex::new(SessionInner {
                lifecycle: Lifecycle::new(),
                driver: None,
                read_only: HashMap::new(),
                output_log: None,
                bus: StatusEventBus::new(),
                engine: None,
                on_destroy,
            }),
            destroyed: AtomicBool::new(false),
        });
        tracing::debug!(session_id = %session.id, context = %session.context, "Session created");
        session
    }

    /// Returns the session ID.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Returns the session context.
    pub fn context(&self) -> &str {
        &self.context
    }

    /// Returns true once the session has been destroyed.
    ///
    /// Does not wait for the session lock.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Returns the current lifecycle phase.
    pub async fn phase(&self) -> Phase {
        self.inner.lock().await.lifecycle.phase()
    }

    /// Returns true while a command is running.
    pub async fn is_active(&self) -> bool {
        self.inner.lock().await.lifecycle.is_active()
    }

    /// Returns true if a driver connection is attached and open.
    pub async fn has_open_driver(&self) -> bool {
        self.inner.lock().await.lifecycle.driver() == DriverPresence::Open
    }

    /// Returns the number of attached read-only channels.
    pub async fn read_only_count(&self) -> usize {
        self.inner.lock().await.read_only.len()
    }

    /// Returns the number of status listeners.
    pub async fn listener_count(&self) -> usize {
        self.inner.lock().await.bus.len()
    }

    /// Asks for the channel to become the driver.
    ///
    /// The first driver of a session starts the engine. While a driver is
    /// open, further requests attach the channel read-only instead. A driver
    /// arriving after the previous one closed takes over the running engine.
    ///
    /// If the engine cannot be started the session is destroyed.
    pub async fn attach_driver(
        self: &Arc<Self>,
        channel: OutputChannel,
    ) -> Result<AttachOutcome, SessionError> {
        let mut inner = self.inner.lock().await;
        if inner.lifecycle.is_destroyed() {
            return Err(SessionError::Destroyed(self.context.clone()));
        }

        let (next, effects) = inner.lifecycle.apply(LifecycleInput::DriverAttached);

        if effects.contains(&Effect::StartEngine) {
            let handle = match self.engine.spawn(&self.context) {
                Ok(handle) => handle,
                Err(e) => {
                    tracing::warn!(session_id = %self.id, error = %e, "Failed to start engine");
                    self.apply(&mut inner, LifecycleInput::EngineFailed, None);
                    return Err(e);
                }
            };
            inner.engine = Some(handle.control);
            inner.output_log = self.open_output_log();
            self.spawn_pump(handle.events);
        }
        inner.lifecycle = next;

        if effects.contains(&Effect::DemoteToReadOnly) {
            tracing::info!(
                session_id = %self.id,
                channel_id = %channel.id(),
                "Driver already attached, attaching read-only"
            );
            inner.read_only.insert(channel.id().clone(), channel);
            return Ok(AttachOutcome::BecameReadOnly);
        }

        tracing::info!(session_id = %self.id, channel_id = %channel.id(), "Driver attached");
        inner.driver = Some(channel);
        Ok(AttachOutcome::Accepted)
    }

    /// Attaches a read-only channel.
    pub async fn attach_read_only(&self, channel: OutputChannel) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().await;
        if inner.lifecycle.is_destroyed() {
            return Err(SessionError::Destroyed(self.context.clone()));
        }

        tracing::info!(session_id = %self.id, channel_id = %channel.id(), "Read-only channel attached");
        inner.read_only.insert(channel.id().clone(), channel);
        Ok(())
    }

    /// Detaches the driver if `channel_id` is the current driver.
    ///
    /// Returns false if it was not.
    pub async fn detach_driver(&self, channel_id: &str) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.driver.as_ref() {
            Some(driver) if driver.id() == channel_id => {}
            _ => return false,
        }

        inner.driver = None;
        tracing::info!(session_id = %self.id, channel_id = %channel_id, "Driver detached");
        self.apply(&mut inner, LifecycleInput::DriverDetached, None);
        true
    }

    /// Detaches a read-only channel. Returns false if it was not attached.
    pub async fn detach_read_only(&self, channel_id: &str) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.read_only.remove(channel_id).is_none() {
            return false;
        }

        tracing::debug!(session_id = %self.id, channel_id = %channel_id, "Read-only channel detached");
        self.apply(&mut inner, LifecycleInput::ReadOnlyDetached, None);
        true
    }

    /// Replicates a chunk of output to the driver and every read-only
    /// channel. Channels that cannot take the chunk are closed.
    pub async fn write_output(&self, data: &[u8]) {
        let mut inner = self.inner.lock().await;
        if inner.lifecycle.is_destroyed() {
            return;
        }

        let driver_failed = inner
            .driver
            .as_mut()
            .is_some_and(|driver| driver.send(data).is_err());

        let failed: Vec<ChannelId> = inner
            .read_only
            .iter_mut()
            .filter_map(|(id, channel)| channel.send(data).err().map(|_| id.clone()))
            .collect();

        if let Some(log) = inner.output_log.as_mut() {
            if log.send(data).is_err() {
                inner.output_log = None;
            }
        }

        if driver_failed {
            inner.driver = None;
            tracing::info!(session_id = %self.id, "Driver channel failed, detaching");
            self.apply(&mut inner, LifecycleInput::DriverDetached, None);
        }

        for id in failed {
            inner.read_only.remove(&id);
            tracing::debug!(session_id = %self.id, channel_id = %id, "Read-only channel failed, detaching");
            self.apply(&mut inner, LifecycleInput::ReadOnlyDetached, None);
        }
    }

    /// Handles a status transition reported by the engine.
    ///
    /// A final status first appends the completion marker to read-only
    /// channels, then listeners are notified, then the destruction
    /// condition is checked.
    pub async fn on_status_changed(&self, event: StatusUpdateEvent) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().await;
        if inner.lifecycle.is_destroyed() {
            return Err(SessionError::Destroyed(self.context.clone()));
        }

        tracing::debug!(
            session_id = %self.id,
            task_id = %event.task_id,
            old_status = %event.old_status,
            new_status = %event.new_status,
            "Status changed"
        );
        self.apply(
            &mut inner,
            LifecycleInput::StatusChanged(event.new_status),
            Some(&event),
        );
        Ok(())
    }

    /// Forwards input from the driver to the engine.
    pub async fn submit_input(&self, channel_id: &str, data: Vec<u8>) -> Result<(), SessionError> {
        let inner = self.inner.lock().await;
        self.driver_engine(&inner, channel_id)?.input(data)
    }

    /// Forwards a terminal size change from the driver to the engine.
    pub async fn resize(&self, channel_id: &str, cols: u16, rows: u16) -> Result<(), SessionError> {
        let inner = self.inner.lock().await;
        self.driver_engine(&inner, channel_id)?.resize(cols, rows)
    }

    /// Registers a status listener.
    ///
    /// Listeners do not keep the session alive.
    pub async fn subscribe_status(&self) -> Result<StatusSubscription, SessionError> {
        let mut inner = self.inner.lock().await;
        if inner.lifecycle.is_destroyed() {
            return Err(SessionError::Destroyed(self.context.clone()));
        }
        let subscription = inner.bus.subscribe();
        tracing::debug!(session_id = %self.id, listener_id = subscription.id, "Status listener subscribed");
        Ok(subscription)
    }

    /// Removes a status listener. Returns false if it was not registered.
    pub async fn unsubscribe_status(&self, id: ListenerId) -> bool {
        let mut inner = self.inner.lock().await;
        if !inner.bus.unsubscribe(id) {
            return false;
        }

        tracing::debug!(session_id = %self.id, listener_id = id, "Status listener unsubscribed");
        self.apply(&mut inner, LifecycleInput::ListenerDetached, None);
        true
    }

    /// Destroys the session regardless of activity.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        self.apply(&mut inner, LifecycleInput::Shutdown, None);
    }

    fn driver_engine<'a>(
        &self,
        inner: &'a SessionInner,
        channel_id: &str,
    ) -> Result<&'a EngineControl, SessionError> {
        if inner.lifecycle.is_destroyed() {
            return Err(SessionError::Destroyed(self.context.clone()));
        }
        match inner.driver.as_ref() {
            Some(driver) if driver.id() == channel_id => {}
            _ => return Err(SessionError::NoDriver(self.context.clone())),
        }
        inner
            .engine
            .as_ref()
            .ok_or_else(|| SessionError::Engine("engine not started".to_string()))
    }

    /// Runs one lifecycle transition and carries out its effects.
    fn apply(&self, inner: &mut SessionInner, input: LifecycleInput, event: Option<&StatusUpdateEvent>) {
        let (next, effects) = inner.lifecycle.apply(input);
        inner.lifecycle = next;

        for effect in effects {
            match effect {
                Effect::AppendCompletion(status) => self.append_completion(inner, status),
                Effect::NotifyListeners => {
                    if let Some(event) = event {
                        let delivered = inner.bus.broadcast(event);
                        tracing::trace!(session_id = %self.id, delivered, "Status event delivered");
                    }
                }
                Effect::Destroy => self.destroy(inner),
                // Only produced for DriverAttached, handled in attach_driver.
                Effect::StartEngine | Effect::DemoteToReadOnly => {}
            }
        }
    }

    fn append_completion(&self, inner: &mut SessionInner, status: TaskStatus) {
        let marker = completion_marker(status);
        inner
            .read_only
            .retain(|_, channel| channel.send(marker.as_bytes()).is_ok());

        if let Some(log) = inner.output_log.as_mut() {
            if log.send(marker.as_bytes()).is_err() {
                inner.output_log = None;
            }
        }
    }

    fn destroy(&self, inner: &mut SessionInner) {
        self.destroyed.store(true, Ordering::SeqCst);

        // Dropping the channels ends their writer tasks.
        inner.driver = None;
        inner.read_only.clear();
        inner.output_log = None;
        inner.bus.clear();
        if let Some(engine) = inner.engine.take() {
            engine.shutdown();
        }

        tracing::info!(session_id = %self.id, context = %self.context, "Session destroyed");

        if let Some(on_destroy) = inner.on_destroy.take() {
            on_destroy(&self.id);
        }
    }

    fn open_output_log(&self) -> Option<OutputChannel> {
        let dir = self.settings.output_log_dir.as_ref()?;
        match output_log::open(dir, &self.context, self.settings.channel_capacity) {
            Ok(channel) => Some(channel),
            Err(e) => {
                tracing::warn!(
                    session_id = %self.id,
                    dir = %dir.display(),
                    error = %e,
                    "Failed to open output log"
                );
                None
            }
        }
    }

    fn spawn_pump(self: &Arc<Self>, mut events: mpsc::Receiver<EngineEvent>) {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(session) = weak.upgrade() else {
                    break;
                };
                if session.is_destroyed() {
                    break;
                }

                match event {
                    EngineEvent::Output(data) => session.write_output(&data).await,
                    EngineEvent::Status { task_id, old, new } => {
                        let event =
                            StatusUpdateEvent::new(task_id.to_string(), old, new, session.context());
                        if let Err(e) = session.on_status_changed(event).await {
                            tracing::debug!(session_id = %session.id, error = %e, "Status dropped");
                        }
                    }
                }
            }
        });
    }
}

impl std::fmt::Debug for TerminalSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalSession")
            .field("id", &self.id)
            .field("context", &self.context)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

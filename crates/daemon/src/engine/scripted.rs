//! Programmatically driven engine.
//!
//! [`ScriptedEngine`] runs no processes. Each spawn hands a
//! [`ScriptedProcess`] to the owner, who then decides what output and
//! status transitions the session sees and inspects the commands the
//! session sent. Used by the integration tests and the fan-out benchmark.

use std::sync::atomic::{AtomicUsize, Ordering};

use protocol::{TaskStatus, READY_MARKER};
use tokio::sync::mpsc;

use super::{EngineCommand, EngineControl, EngineEvent, EngineHandle, ProcessEngine, EVENT_CAPACITY};
use crate::session::SessionError;

/// Engine whose processes are driven by the caller.
#[derive(Debug)]
pub struct ScriptedEngine {
    spawned: mpsc::UnboundedSender<ScriptedProcess>,
    spawn_count: AtomicUsize,
    emit_ready: bool,
}

impl ScriptedEngine {
    /// Creates an engine that writes the ready marker on spawn.
    ///
    /// Returns the engine and the queue receiving one [`ScriptedProcess`]
    /// per spawn.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ScriptedProcess>) {
        Self::build(true)
    }

    /// Creates an engine that never writes the ready marker on its own.
    pub fn silent() -> (Self, mpsc::UnboundedReceiver<ScriptedProcess>) {
        Self::build(false)
    }

    fn build(emit_ready: bool) -> (Self, mpsc::UnboundedReceiver<ScriptedProcess>) {
        let (spawned, rx) = mpsc::unbounded_channel();
        let engine = ScriptedEngine {
            spawned,
            spawn_count: AtomicUsize::new(0),
            emit_ready,
        };
        (engine, rx)
    }

    /// Returns how many times the engine was started.
    pub fn spawn_count(&self) -> usize {
        self.spawn_count.load(Ordering::SeqCst)
    }
}

impl ProcessEngine for ScriptedEngine {
    fn spawn(&self, context: &str) -> Result<EngineHandle, SessionError> {
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::channel(EVENT_CAPACITY);

        if self.emit_ready {
            events_tx
                .try_send(EngineEvent::Output(READY_MARKER.as_bytes().to_vec()))
                .map_err(|e| SessionError::Engine(e.to_string()))?;
        }

        let process = ScriptedProcess {
            context: context.to_string(),
            events: events_tx,
            commands,
        };
        self.spawned
            .send(process)
            .map_err(|_| SessionError::Engine("scripted engine owner is gone".to_string()))?;
        self.spawn_count.fetch_add(1, Ordering::SeqCst);

        Ok(EngineHandle {
            control: EngineControl::new(command_tx),
            events,
        })
    }
}

/// One spawned scripted process.
#[derive(Debug)]
pub struct ScriptedProcess {
    context: String,
    events: mpsc::Sender<EngineEvent>,
    commands: mpsc::UnboundedReceiver<EngineCommand>,
}

impl ScriptedProcess {
    /// Returns the context the process was spawned for.
    pub fn context(&self) -> &str {
        &self.context
    }

    /// Emits an output chunk.
    pub async fn output(&self, data: impl AsRef<[u8]>) -> bool {
        self.events
            .send(EngineEvent::Output(data.as_ref().to_vec()))
            .await
            .is_ok()
    }

    /// Emits the ready marker.
    pub async fn ready(&self) -> bool {
        self.output(READY_MARKER).await
    }

    /// Emits a status transition.
    pub async fn status(&self, task_id: u64, old: TaskStatus, new: TaskStatus) -> bool {
        self.events
            .send(EngineEvent::Status { task_id, old, new })
            .await
            .is_ok()
    }

    /// Waits for the next command sent by the session.
    pub async fn next_command(&mut self) -> Option<EngineCommand> {
        self.commands.recv().await
    }

    /// Returns a command if one is already queued.
    pub fn try_next_command(&mut self) -> Option<EngineCommand> {
        self.commands.try_recv().ok()
    }
}

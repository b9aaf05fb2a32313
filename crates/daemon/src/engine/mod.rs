//! Process engines.
//!
//! A process engine runs the commands of one session. The session talks to
//! it through an [`EngineHandle`]: commands go in through an
//! [`EngineControl`], and output chunks and status transitions come back,
//! interleaved in production order, on a single event queue.

pub mod scripted;
pub mod shell;

use protocol::TaskStatus;
use tokio::sync::mpsc;

use crate::session::SessionError;

pub use scripted::{ScriptedEngine, ScriptedProcess};
pub use shell::ShellEngine;

/// Capacity of the engine event queue.
pub const EVENT_CAPACITY: usize = 256;

/// Commands sent from a session to its engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommand {
    /// Raw terminal input from the driver.
    Input(Vec<u8>),
    /// Terminal size change.
    Resize {
        /// Width in columns.
        cols: u16,
        /// Height in rows.
        rows: u16,
    },
    /// Stop the engine, killing any running command.
    Shutdown,
}

/// Events produced by an engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A chunk of terminal output.
    Output(Vec<u8>),
    /// A task changed status.
    Status {
        /// Task identifier, unique within the process.
        task_id: u64,
        /// Status before the transition.
        old: TaskStatus,
        /// Status after the transition.
        new: TaskStatus,
    },
}

/// Sending side of an engine's command queue.
#[derive(Debug, Clone)]
pub struct EngineControl {
    tx: mpsc::UnboundedSender<EngineCommand>,
}

impl EngineControl {
    /// Wraps a command sender.
    pub fn new(tx: mpsc::UnboundedSender<EngineCommand>) -> Self {
        Self { tx }
    }

    /// Forwards driver input.
    pub fn input(&self, data: Vec<u8>) -> Result<(), SessionError> {
        self.send(EngineCommand::Input(data))
    }

    /// Forwards a terminal size change.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), SessionError> {
        self.send(EngineCommand::Resize { cols, rows })
    }

    /// Asks the engine to stop. Ignored if it already has.
    pub fn shutdown(&self) {
        let _ = self.tx.send(EngineCommand::Shutdown);
    }

    fn send(&self, command: EngineCommand) -> Result<(), SessionError> {
        self.tx
            .send(command)
            .map_err(|_| SessionError::Engine("engine stopped".to_string()))
    }
}

/// A running engine instance.
#[derive(Debug)]
pub struct EngineHandle {
    /// Command input.
    pub control: EngineControl,
    /// Output and status events, in production order.
    pub events: mpsc::Receiver<EngineEvent>,
}

/// Starts command engines for sessions.
pub trait ProcessEngine: Send + Sync {
    /// Starts an engine for the session of the given context.
    ///
    /// The engine must write [`protocol::READY_MARKER`] as its own output
    /// chunk whenever it is ready to accept a command. Must be called from
    /// within a tokio runtime.
    fn spawn(&self, context: &str) -> Result<EngineHandle, SessionError>;
}

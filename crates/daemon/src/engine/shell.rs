//! Shell-backed process engine.
//!
//! [`ShellEngine`] behaves like a small line-oriented shell. It writes the
//! ready marker, echoes typed characters, and on each complete line runs
//! `<shell> -c <line>` in its own pseudo-terminal. While a command runs,
//! input is forwarded to it and a Ctrl-C kills it. Every command goes
//! through NEW, RUNNING and one final status, and its output is always
//! emitted before its final status.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};

use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use protocol::{TaskStatus, READY_MARKER};
use tokio::sync::mpsc;

use super::{EngineCommand, EngineControl, EngineEvent, EngineHandle, ProcessEngine, EVENT_CAPACITY};
use crate::session::SessionError;

/// Buffer size for reading from the PTY.
const READ_BUFFER_SIZE: usize = 4096;

/// Initial terminal size.
const DEFAULT_COLS: u16 = 80;
const DEFAULT_ROWS: u16 = 24;

const CTRL_C: u8 = 0x03;
const BACKSPACE: u8 = 0x08;
const DELETE: u8 = 0x7f;

/// Task identifiers are unique across every session of the process.
static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Engine running each command line through a shell.
#[derive(Debug, Clone)]
pub struct ShellEngine {
    shell: String,
}

impl ShellEngine {
    /// Creates an engine running commands through `shell -c`.
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    /// Returns the shell command.
    pub fn shell(&self) -> &str {
        &self.shell
    }
}

impl ProcessEngine for ShellEngine {
    fn spawn(&self, context: &str) -> Result<EngineHandle, SessionError> {
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (events, event_rx) = mpsc::channel(EVENT_CAPACITY);

        let actor = ShellActor {
            shell: self.shell.clone(),
            context: context.to_string(),
            commands,
            events,
            line: Vec::new(),
            size: (DEFAULT_COLS, DEFAULT_ROWS),
            running: None,
        };
        tokio::spawn(actor.run());

        tracing::debug!(context = %context, shell = %self.shell, "Shell engine started");

        Ok(EngineHandle {
            control: EngineControl::new(command_tx),
            events: event_rx,
        })
    }
}

/// Exit notification from a task's reader thread.
#[derive(Debug)]
struct TaskExit {
    task_id: u64,
    success: bool,
}

/// A command currently running in its own PTY.
struct RunningTask {
    id: u64,
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    interrupted: bool,
}

struct ShellActor {
    shell: String,
    context: String,
    commands: mpsc::UnboundedReceiver<EngineCommand>,
    events: mpsc::Sender<EngineEvent>,
    line: Vec<u8>,
    size: (u16, u16),
    running: Option<RunningTask>,
}

impl ShellActor {
    async fn run(mut self) {
        let (exit_tx, mut exit_rx) = mpsc::unbounded_channel::<TaskExit>();

        if !self.emit_output(READY_MARKER.as_bytes().to_vec()).await {
            return;
        }

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(EngineCommand::Input(data)) => {
                        if !self.handle_input(data, &exit_tx).await {
                            break;
                        }
                    }
                    Some(EngineCommand::Resize { cols, rows }) => self.resize(cols, rows),
                    Some(EngineCommand::Shutdown) | None => break,
                },
                Some(exit) = exit_rx.recv() => {
                    if !self.finish_task(exit).await {
                        break;
                    }
                }
            }
        }

        self.kill_running();
        tracing::debug!(context = %self.context, "Shell engine stopped");
    }

    /// Handles driver input. Returns false once the event queue is gone.
    async fn handle_input(&mut self, data: Vec<u8>, exit_tx: &mpsc::UnboundedSender<TaskExit>) -> bool {
        let mut echo = Vec::new();

        for (index, byte) in data.iter().copied().enumerate() {
            if let Some(task) = self.running.as_mut() {
                let (input, interrupt) = split_at_interrupt(&data[index..]);
                if !input.is_empty() {
                    if let Err(e) = task.writer.write_all(input).and_then(|_| task.writer.flush()) {
                        tracing::warn!(task_id = task.id, error = %e, "Failed to write to task");
                    }
                }
                if interrupt {
                    task.interrupted = true;
                    if let Err(e) = task.killer.kill() {
                        tracing::warn!(task_id = task.id, error = %e, "Failed to kill task");
                    }
                }
                break;
            }

            match byte {
                b'\r' | b'\n' => {
                    echo.extend_from_slice(b"\r\n");
                    let line = String::from_utf8_lossy(&self.line).trim().to_string();
                    self.line.clear();

                    if !self.emit_output(std::mem::take(&mut echo)).await {
                        return false;
                    }
                    let ok = if line.is_empty() {
                        self.emit_output(READY_MARKER.as_bytes().to_vec()).await
                    } else {
                        self.start_task(&line, exit_tx).await
                    };
                    if !ok {
                        return false;
                    }
                }
                CTRL_C => {
                    self.line.clear();
                    echo.extend_from_slice(b"^C\r\n");
                    if !self.emit_output(std::mem::take(&mut echo)).await {
                        return false;
                    }
                    if !self.emit_output(READY_MARKER.as_bytes().to_vec()).await {
                        return false;
                    }
                }
                BACKSPACE | DELETE => {
                    if self.line.pop().is_some() {
                        echo.extend_from_slice(b"\x08 \x08");
                    }
                }
                _ => {
                    self.line.push(byte);
                    echo.push(byte);
                }
            }
        }

        if echo.is_empty() {
            true
        } else {
            self.emit_output(echo).await
        }
    }

    async fn start_task(&mut self, line: &str, exit_tx: &mpsc::UnboundedSender<TaskExit>) -> bool {
        let task_id = NEXT_TASK_ID.fetch_add(1, Ordering::SeqCst);

        if !self.emit_status(task_id, TaskStatus::New, TaskStatus::Running).await {
            return false;
        }

        match self.spawn_task(task_id, line, exit_tx) {
            Ok(task) => {
                tracing::info!(context = %self.context, task_id, command = %line, "Task started");
                self.running = Some(task);
                true
            }
            Err(e) => {
                tracing::warn!(context = %self.context, task_id, error = %e, "Task failed to start");
                self.emit_output(format!("{}\r\n", e).into_bytes()).await
                    && self.emit_status(task_id, TaskStatus::Running, TaskStatus::Failed).await
                    && self.emit_output(READY_MARKER.as_bytes().to_vec()).await
            }
        }
    }

    fn spawn_task(
        &self,
        task_id: u64,
        line: &str,
        exit_tx: &mpsc::UnboundedSender<TaskExit>,
    ) -> Result<RunningTask, SessionError> {
        let (cols, rows) = self.size;
        let pair = native_pty_system()
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::Engine(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&self.shell);
        cmd.arg("-c");
        cmd.arg(line);
        if let Ok(cwd) = std::env::current_dir() {
            cmd.cwd(cwd);
        }

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SessionError::Engine(e.to_string()))?;
        // The reader only sees EOF once every slave handle is gone.
        drop(pair.slave);

        let killer = child.clone_killer();
        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SessionError::Engine(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SessionError::Engine(e.to_string()))?;

        let events = self.events.clone();
        let exit_tx = exit_tx.clone();
        tokio::task::spawn_blocking(move || {
            let mut buffer = vec![0u8; READ_BUFFER_SIZE];
            loop {
                match reader.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(n) => {
                        if events.blocking_send(EngineEvent::Output(buffer[..n].to_vec())).is_err() {
                            break;
                        }
                    }
                    // Linux reports EIO once the child side closes.
                    Err(_) => break,
                }
            }

            let success = match child.wait() {
                Ok(status) => status.success(),
                Err(e) => {
                    tracing::warn!(task_id, error = %e, "Failed to wait for task");
                    false
                }
            };
            let _ = exit_tx.send(TaskExit { task_id, success });
        });

        Ok(RunningTask {
            id: task_id,
            master: pair.master,
            writer,
            killer,
            interrupted: false,
        })
    }

    async fn finish_task(&mut self, exit: TaskExit) -> bool {
        let Some(task) = self.running.take_if(|task| task.id == exit.task_id) else {
            return true;
        };

        let status = if task.interrupted {
            TaskStatus::Killed
        } else if exit.success {
            TaskStatus::Done
        } else {
            TaskStatus::Failed
        };
        tracing::info!(context = %self.context, task_id = task.id, status = %status, "Task finished");

        self.emit_status(task.id, TaskStatus::Running, status).await
            && self.emit_output(READY_MARKER.as_bytes().to_vec()).await
    }

    fn resize(&mut self, cols: u16, rows: u16) {
        self.size = (cols, rows);
        if let Some(task) = self.running.as_ref() {
            let size = PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            };
            if let Err(e) = task.master.resize(size) {
                tracing::warn!(task_id = task.id, error = %e, "Failed to resize task PTY");
            }
        }
    }

    fn kill_running(&mut self) {
        if let Some(mut task) = self.running.take() {
            if let Err(e) = task.killer.kill() {
                tracing::debug!(task_id = task.id, error = %e, "Kill on shutdown failed");
            }
        }
    }

    async fn emit_output(&mut self, data: Vec<u8>) -> bool {
        self.events.send(EngineEvent::Output(data)).await.is_ok()
    }

    async fn emit_status(&mut self, task_id: u64, old: TaskStatus, new: TaskStatus) -> bool {
        self.events
            .send(EngineEvent::Status { task_id, old, new })
            .await
            .is_ok()
    }
}

/// Splits task input at the first Ctrl-C.
///
/// Returns the bytes to write to the task and whether it must be killed
/// afterwards. Bytes after the Ctrl-C are dropped.
fn split_at_interrupt(data: &[u8]) -> (&[u8], bool) {
    match data.iter().position(|&byte| byte == CTRL_C) {
        Some(position) => (&data[..position], true),
        None => (data, false),
    }
}

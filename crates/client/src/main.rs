//! TermBridge Client
//!
//! Runs one command in a shared session and exits with its status.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use client::protocol::{ResponseMode, StatusUpdateEvent, TaskStatus};
use client::{ClientConfig, ClientSessionBridge};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

/// Quiet period after the final status during which late output is still
/// printed.
const OUTPUT_GRACE: Duration = Duration::from_millis(200);

/// TermBridge Client - runs a command in a shared terminal session.
#[derive(Parser, Debug)]
#[command(name = "termbridge-client")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Daemon URL
    #[arg(long, default_value = "ws://127.0.0.1:8080")]
    pub url: String,

    /// Session context
    #[arg(short, long, default_value = "")]
    pub context: String,

    /// Request text frames instead of binary frames
    #[arg(long)]
    pub text: bool,

    /// Observe the session without submitting a command
    #[arg(long)]
    pub read_only: bool,

    /// Seconds to wait for the session to become ready
    #[arg(long, default_value_t = 10)]
    pub timeout: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Command line to run
    #[arg(trailing_var_arg = true, required_unless_present = "read_only")]
    pub command: Vec<String>,
}

impl Cli {
    fn client_config(&self) -> ClientConfig {
        let mode = if self.text {
            ResponseMode::Text
        } else {
            ResponseMode::Binary
        };
        ClientConfig::new(self.url.clone())
            .with_context(self.context.clone())
            .with_response_mode(mode)
            .with_read_only(self.read_only)
            .with_ready_timeout(Duration::from_secs(self.timeout))
    }
}

/// Maps a final status to the process exit code.
fn exit_code(status: TaskStatus) -> u8 {
    match status {
        TaskStatus::Done => 0,
        TaskStatus::Killed => 130,
        _ => 1,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.client_config();
    config.validate()?;

    let mut bridge = ClientSessionBridge::connect(config)
        .await
        .with_context(|| format!("Failed to connect to {}", cli.url))?;
    let mut output = bridge
        .take_output()
        .context("Output queue already taken")?;
    let mut status = bridge
        .take_status_updates()
        .context("Status queue already taken")?;

    if cli.read_only {
        observe(&mut output, &mut status).await?;
        bridge.close().await?;
        return Ok(ExitCode::SUCCESS);
    }

    let command = cli.command.join(" ");
    bridge
        .execute_command(&command)
        .await
        .context("Failed to submit command")?;

    let final_status = follow(&mut output, &mut status).await?;
    bridge.close().await?;

    match final_status {
        Some(status) => Ok(ExitCode::from(exit_code(status))),
        None => anyhow::bail!("Session closed before the command finished"),
    }
}

/// Prints output until the submitted command reaches a final status.
///
/// The first task created after submission is taken to be the command.
async fn follow(
    output: &mut mpsc::UnboundedReceiver<Vec<u8>>,
    status: &mut mpsc::UnboundedReceiver<StatusUpdateEvent>,
) -> anyhow::Result<Option<TaskStatus>> {
    let mut stdout = tokio::io::stdout();
    let mut task_id: Option<String> = None;

    let final_status = loop {
        tokio::select! {
            chunk = output.recv() => match chunk {
                Some(chunk) => {
                    stdout.write_all(&chunk).await?;
                    stdout.flush().await?;
                }
                None => break None,
            },
            event = status.recv() => {
                let Some(event) = event else { break None };
                tracing::debug!(task_id = %event.task_id, status = %event.new_status, "Status update");

                if task_id.is_none() && event.old_status == TaskStatus::New {
                    task_id = Some(event.task_id.clone());
                }
                if task_id.as_deref() == Some(event.task_id.as_str()) && event.is_final() {
                    break Some(event.new_status);
                }
            }
        }
    };

    // Status and output travel on separate connections.
    while let Ok(Some(chunk)) = tokio::time::timeout(OUTPUT_GRACE, output.recv()).await {
        stdout.write_all(&chunk).await?;
    }
    stdout.flush().await?;

    Ok(final_status)
}

/// Prints output and status transitions until the session ends or Ctrl-C.
async fn observe(
    output: &mut mpsc::UnboundedReceiver<Vec<u8>>,
    status: &mut mpsc::UnboundedReceiver<StatusUpdateEvent>,
) -> anyhow::Result<()> {
    let mut stdout = tokio::io::stdout();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            chunk = output.recv() => match chunk {
                Some(chunk) => {
                    stdout.write_all(&chunk).await?;
                    stdout.flush().await?;
                }
                None => return Ok(()),
            },
            Some(event) = status.recv() => {
                eprintln!(
                    "[{}] task {}: {} -> {}",
                    event.context, event.task_id, event.old_status, event.new_status
                );
            }
        }
    }
}

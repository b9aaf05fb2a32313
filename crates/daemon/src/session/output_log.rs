//! Output log channel.
//!
//! When an output log directory is configured, each session appends its
//! terminal output to `<dir>/context-<encoded context>.log` through an
//! extra read-only channel. The empty context logs to `default.log`. The log
//! channel never counts towards keeping a session alive.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use url::form_urlencoded;

use super::channel::OutputChannel;
use super::error::SessionError;

/// Returns the log file path for a context.
///
/// Distinct contexts always map to distinct files.
pub fn log_path(dir: &Path, context: &str) -> PathBuf {
    if context.is_empty() {
        return dir.join("default.log");
    }
    let encoded: String = form_urlencoded::byte_serialize(context.as_bytes()).collect();
    dir.join(format!("context-{}.log", encoded))
}

/// Opens the log file for a context and starts its writer task.
///
/// Must be called from within a tokio runtime.
pub fn open(dir: &Path, context: &str, capacity: usize) -> Result<OutputChannel, SessionError> {
    std::fs::create_dir_all(dir)?;
    let path = log_path(dir, context);
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)?;
    let mut file = tokio::fs::File::from_std(file);

    let (channel, mut rx) = OutputChannel::with_capacity(capacity);
    let channel_id = channel.id().clone();

    tokio::spawn(async move {
        while let Some(chunk) = rx.recv().await {
            if let Err(e) = file.write_all(&chunk).await {
                tracing::warn!(
                    channel_id = %channel_id,
                    path = %path.display(),
                    error = %e,
                    "Failed to write output log, closing it"
                );
                return;
            }
        }
        if let Err(e) = file.flush().await {
            tracing::warn!(path = %path.display(), error = %e, "Failed to flush output log");
        }
    });

    Ok(channel)
}

//! Wire message definitions for TermBridge.
//!
//! Every JSON payload exchanged over the command and status endpoints is
//! defined here, together with the literal markers the shell engine writes
//! into the output stream.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Output item signalling that the shell is ready for a command.
///
/// Always sent as a whole frame on its own; consumers compare whole
/// messages against it and never scan for it inside other output.
pub const READY_MARKER: &str = "% ";

/// Builds the line appended to read-only channels when a command finishes.
pub fn completion_marker(status: TaskStatus) -> String {
    format!("% # Finished with status: {}\r\n", status)
}

// ============================================================================
// Status Messages
// ============================================================================

/// Lifecycle status of a command executed in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    /// Task created but not started yet.
    New,
    /// Task is executing.
    Running,
    /// Task completed successfully.
    Done,
    /// Task exited with a failure.
    Failed,
    /// Task was interrupted or killed.
    Killed,
}

impl TaskStatus {
    /// Returns true if no further transitions can follow this status.
    pub fn is_final(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed | TaskStatus::Killed)
    }

    /// Returns the wire representation of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::New => "NEW",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Done => "DONE",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Killed => "KILLED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status transition of one task in one context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdateEvent {
    /// Identifier of the task that changed status.
    pub task_id: String,
    /// Status before the transition.
    pub old_status: TaskStatus,
    /// Status after the transition.
    pub new_status: TaskStatus,
    /// Context of the session the task belongs to.
    pub context: String,
}

impl StatusUpdateEvent {
    /// Creates a new status update event.
    pub fn new(
        task_id: impl Into<String>,
        old_status: TaskStatus,
        new_status: TaskStatus,
        context: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            old_status,
            new_status,
            context: context.into(),
        }
    }

    /// Returns true if the new status is final.
    pub fn is_final(&self) -> bool {
        self.new_status.is_final()
    }
}

/// Frames sent on the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum StatusMessage {
    /// A task status transition.
    StatusUpdate {
        /// The transition.
        event: StatusUpdateEvent,
    },
}

impl StatusMessage {
    /// Encodes the message as a JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes a message from a JSON string.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Returns the carried event.
    pub fn into_event(self) -> StatusUpdateEvent {
        match self {
            StatusMessage::StatusUpdate { event } => event,
        }
    }
}

impl From<StatusUpdateEvent> for StatusMessage {
    fn from(event: StatusUpdateEvent) -> Self {
        StatusMessage::StatusUpdate { event }
    }
}

// ============================================================================
// Terminal Messages
// ============================================================================

/// Wire representation of output frames on a command connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseMode {
    /// Output is sent as UTF-8 text frames.
    Text,
    /// Output is sent as raw binary frames.
    Binary,
}

impl fmt::Display for ResponseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseMode::Text => f.write_str("TEXT"),
            ResponseMode::Binary => f.write_str("BINARY"),
        }
    }
}

/// Envelopes sent by the driver connection to the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum TermAction {
    /// Raw input for the terminal.
    Read {
        /// Characters typed by the driver.
        data: String,
    },
    /// Terminal size change.
    Resize {
        /// Terminal width in columns.
        cols: u16,
        /// Terminal height in rows.
        rows: u16,
    },
}

impl TermAction {
    /// Builds the envelope that submits one command line.
    pub fn command(command: &str) -> Self {
        TermAction::Read {
            data: format!("{}\n", command),
        }
    }

    /// Encodes the envelope as a JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes an envelope from raw frame bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_final_statuses() {
        assert!(!TaskStatus::New.is_final());
        assert!(!TaskStatus::Running.is_final());
        assert!(TaskStatus::Done.is_final());
        assert!(TaskStatus::Failed.is_final());
        assert!(TaskStatus::Killed.is_final());
    }

    #[test]
    fn test_completion_marker() {
        assert_eq!(
            completion_marker(TaskStatus::Done),
            "% # Finished with status: DONE\r\n"
        );
        assert_eq!(
            completion_marker(TaskStatus::Killed),
            "% # Finished with status: KILLED\r\n"
        );
    }

    #[test]
    fn test_command_envelope_wire_format() {
        let json = TermAction::command("echo hi").to_json().unwrap();
        assert_eq!(json, r#"{"action":"read","data":"echo hi\n"}"#);
    }

    #[test]
    fn test_command_envelope_escapes_quotes() {
        let json = TermAction::command(r#"echo "quoted""#).to_json().unwrap();
        assert_eq!(json, r#"{"action":"read","data":"echo \"quoted\"\n"}"#);
    }

    #[test]
    fn test_resize_envelope_decoding() {
        let action = TermAction::from_slice(br#"{"action":"resize","cols":120,"rows":40}"#).unwrap();
        assert_eq!(action, TermAction::Resize { cols: 120, rows: 40 });
    }

    #[test]
    fn test_unknown_action_rejected() {
        let result = TermAction::from_slice(br#"{"action":"explode"}"#);
        assert!(matches!(
            result,
            Err(crate::error::ProtocolError::Deserialization(_))
        ));
    }

    #[test]
    fn test_status_message_wire_format() {
        let event = StatusUpdateEvent::new("7", TaskStatus::Running, TaskStatus::Done, "c1");
        let json = StatusMessage::from(event).to_json().unwrap();
        assert_eq!(
            json,
            r#"{"action":"status-update","event":{"taskId":"7","oldStatus":"RUNNING","newStatus":"DONE","context":"c1"}}"#
        );
    }

    #[test]
    fn test_status_message_decoding() {
        let text = r#"{"action":"status-update","event":{"taskId":"3","oldStatus":"NEW","newStatus":"RUNNING","context":""}}"#;
        let event = StatusMessage::from_json(text).unwrap().into_event();
        assert_eq!(event.task_id, "3");
        assert_eq!(event.old_status, TaskStatus::New);
        assert_eq!(event.new_status, TaskStatus::Running);
        assert!(event.context.is_empty());
        assert!(!event.is_final());
    }

    #[test]
    fn test_response_mode_display() {
        assert_eq!(ResponseMode::Text.to_string(), "TEXT");
        assert_eq!(ResponseMode::Binary.to_string(), "BINARY");
    }
}

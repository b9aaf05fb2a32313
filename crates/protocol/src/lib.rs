//! # TermBridge Protocol Library
//!
//! Wire definitions shared by the TermBridge daemon and its clients.
//!
//! ## Overview
//!
//! - **Status events**: task lifecycle transitions and their JSON frames
//! - **Terminal envelopes**: driver input (`read`) and terminal resize
//! - **Markers**: the `"% "` ready marker and the completion line
//! - **Endpoints**: request paths for command and status connections
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{Endpoint, ResponseMode, TermAction};
//!
//! let endpoint = Endpoint::Command {
//!     context: "build-1".to_string(),
//!     mode: ResponseMode::Binary,
//!     read_only: false,
//! };
//! assert_eq!(endpoint.path(), "/socket/term/build-1");
//!
//! let json = TermAction::command("echo hi").to_json().unwrap();
//! assert_eq!(json, r#"{"action":"read","data":"echo hi\n"}"#);
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: Status events, envelopes and markers
//! - [`endpoint`]: Endpoint path parsing and building
//! - [`error`]: Error types

pub mod endpoint;
pub mod error;
pub mod messages;

pub use endpoint::{Endpoint, READ_ONLY_SUFFIX, STATUS_PATH, TERM_PATH, TEXT_PATH};
pub use error::{ProtocolError, Result};
pub use messages::{
    completion_marker, ResponseMode, StatusMessage, StatusUpdateEvent, TaskStatus, TermAction,
    READY_MARKER,
};

//! # TermBridge Client
//!
//! Connects to a TermBridge daemon, waits for the shared session of a
//! context to become ready and submits commands to it.
//!
//! ```no_run
//! use client::{ClientConfig, ClientSessionBridge};
//!
//! # async fn run() -> client::Result<()> {
//! let config = ClientConfig::new("ws://127.0.0.1:8080").with_context("build");
//! let mut bridge = ClientSessionBridge::connect(config).await?;
//! let mut status = bridge.take_status_updates().expect("status queue");
//!
//! bridge.execute_command("cargo test").await?;
//! while let Some(event) = status.recv().await {
//!     if event.is_final() {
//!         println!("finished with {}", event.new_status);
//!         break;
//!     }
//! }
//! bridge.close().await
//! # }
//! ```

pub mod bridge;
pub mod config;
pub mod error;

pub use bridge::ClientSessionBridge;
pub use config::{ClientConfig, DEFAULT_READY_TIMEOUT};
pub use error::{ClientError, Result};
pub use protocol;

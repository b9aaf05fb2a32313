//! # TermBridge Daemon Library
//!
//! This crate shares interactive command sessions with WebSocket clients.
//!
//! ## Overview
//!
//! Every session is keyed by a *context*. The first command connection of a
//! context becomes the driver and starts the shell engine; later command
//! connections observe the same output read-only until the driver goes
//! away, at which point a new connection takes over without restarting the
//! engine. Status listeners receive every command status transition of
//! their context. A session is destroyed as soon as no command is running
//! and no driver is connected.
//!
//! ## Architecture
//!
//! ```text
//!   WebSocket clients
//!        │
//! ┌──────▼───────────────────────────────────────────────┐
//! │ TermServer: /socket/term  /socket/text  /socket/...  │
//! ├──────────────────────────────────────────────────────┤
//! │ SessionRegistry  (context → TerminalSession)         │
//! ├──────────────────────────────────────────────────────┤
//! │ TerminalSession: driver · read-only channels ·       │
//! │                  status bus · lifecycle              │
//! ├──────────────────────────────────────────────────────┤
//! │ ProcessEngine (ShellEngine over portable-pty)        │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use daemon::{Config, SessionRegistry, ShellEngine, TermServer};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!     let engine = Arc::new(ShellEngine::new(config.session.shell.clone()));
//!     let registry = Arc::new(SessionRegistry::new(engine, config.session.settings()));
//!
//!     let server = TermServer::bind(&config, registry).await?;
//!     server.run(CancellationToken::new()).await
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`engine`]: Process engines running the commands of a session
//! - [`session`]: Sessions, output channels, status bus and registry
//! - [`server`]: WebSocket endpoints

pub mod config;
pub mod engine;
pub mod server;
pub mod session;

// Re-export protocol for convenience
pub use protocol;

pub use config::{Config, ConfigError};
pub use engine::{
    EngineCommand, EngineControl, EngineEvent, EngineHandle, ProcessEngine, ScriptedEngine,
    ScriptedProcess, ShellEngine,
};
pub use server::{ServerState, TermServer};
pub use session::{
    AttachOutcome, OutputChannel, Phase, SessionError, SessionRegistry, SessionSettings,
    StatusEventBus, TerminalSession,
};

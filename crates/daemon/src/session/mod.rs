//! Session management module.
//!
//! This module provides the shared terminal sessions, their output
//! channels and status listeners, and the registry that maps contexts to
//! live sessions.

pub mod bus;
pub mod channel;
pub mod error;
pub mod lifecycle;
pub mod output_log;
pub mod registry;
pub mod terminal;

pub use bus::{ListenerId, StatusEventBus, StatusSubscription};
pub use channel::{ChannelId, ChannelStats, OutputChannel, DEFAULT_CHANNEL_CAPACITY};
pub use error::SessionError;
pub use lifecycle::{DriverPresence, Effect, Lifecycle, LifecycleInput, Phase};
pub use registry::SessionRegistry;
pub use terminal::{AttachOutcome, DestroyCallback, SessionId, SessionSettings, TerminalSession};

//! Session lifecycle state machine.
//!
//! Every decision a session makes about its own life goes through
//! [`Lifecycle::apply`]: it takes the current state and one input and
//! returns the next state plus the effects the session must carry out, in
//! order. The function is pure, so the destruction rules can be checked
//! without any I/O.
//!
//! A session is destroyed the first time, after any input, no command is
//! active and no driver connection is open. Once destroyed, every input is
//! ignored.

use protocol::TaskStatus;

/// Whether a driver connection has ever been attached, and whether it is
/// still open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriverPresence {
    /// No driver has attached yet.
    #[default]
    Never,
    /// A driver connection is attached and open.
    Open,
    /// The last driver connection closed.
    Closed,
}

/// Observable phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No command running and no open driver.
    Idle,
    /// A command is running.
    CommandRunning,
    /// A driver is open but no command is running.
    ConnectedNoCommand,
    /// Terminal; the session accepts nothing further.
    Destroyed,
}

/// Inputs that drive the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleInput {
    /// A command connection asked to become the driver.
    DriverAttached,
    /// The open driver connection closed.
    DriverDetached,
    /// A read-only channel closed.
    ReadOnlyDetached,
    /// A status listener unsubscribed.
    ListenerDetached,
    /// The engine reported a status transition.
    StatusChanged(TaskStatus),
    /// The engine could not be started for the first driver.
    EngineFailed,
    /// The daemon is stopping; destroy regardless of activity.
    Shutdown,
}

/// Effects to carry out after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Start the process engine; this is the first driver.
    StartEngine,
    /// The driver slot is taken; attach the connection as read-only.
    DemoteToReadOnly,
    /// Write the completion marker for this status to read-only channels.
    AppendCompletion(TaskStatus),
    /// Deliver the status event to listeners.
    NotifyListeners,
    /// Tear the session down.
    Destroy,
}

/// Lifecycle state of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Lifecycle {
    active_command: bool,
    driver: DriverPresence,
    destroyed: bool,
}

impl Lifecycle {
    /// State of a freshly created session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true while a command is running.
    pub fn is_active(&self) -> bool {
        self.active_command
    }

    /// Returns the driver presence.
    pub fn driver(&self) -> DriverPresence {
        self.driver
    }

    /// Returns true once the session has been destroyed.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Returns the observable phase.
    pub fn phase(&self) -> Phase {
        if self.destroyed {
            Phase::Destroyed
        } else if self.active_command {
            Phase::CommandRunning
        } else if self.driver == DriverPresence::Open {
            Phase::ConnectedNoCommand
        } else {
            Phase::Idle
        }
    }

    /// Applies one input and returns the next state with its effects.
    pub fn apply(self, input: LifecycleInput) -> (Self, Vec<Effect>) {
        if self.destroyed {
            return (self, Vec::new());
        }

        let mut next = self;
        let mut effects = Vec::new();

        match input {
            LifecycleInput::DriverAttached => {
                match self.driver {
                    DriverPresence::Never => effects.push(Effect::StartEngine),
                    DriverPresence::Closed => {}
                    DriverPresence::Open => effects.push(Effect::DemoteToReadOnly),
                }
                next.driver = DriverPresence::Open;
                // An attach never destroys.
                return (next, effects);
            }
            LifecycleInput::DriverDetached => {
                if self.driver == DriverPresence::Open {
                    next.driver = DriverPresence::Closed;
                }
            }
            LifecycleInput::ReadOnlyDetached
            | LifecycleInput::ListenerDetached
            | LifecycleInput::EngineFailed => {}
            LifecycleInput::Shutdown => {
                next.destroyed = true;
                return (next, vec![Effect::Destroy]);
            }
            LifecycleInput::StatusChanged(status) => {
                next.active_command = !status.is_final();
                if status.is_final() {
                    effects.push(Effect::AppendCompletion(status));
                }
                effects.push(Effect::NotifyListeners);
            }
        }

        if !next.active_command && next.driver != DriverPresence::Open {
            next.destroyed = true;
            effects.push(Effect::Destroy);
        }

        (next, effects)
    }
}

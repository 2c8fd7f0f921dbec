//! ProcessState value object
//! Lifecycle state of one supervised program

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    /// No OS process; initial state and the result of an explicit stop
    #[default]
    Stopped,

    /// Spawned, still inside the start grace period
    Starting,

    /// Survived the grace period
    Running,

    /// Termination signal sent, waiting for the reaper
    Stopping,

    /// Crashed, waiting before the next automatic attempt
    Backoff,

    /// Retry budget exhausted; only an explicit start leaves this state
    Fatal,
}

impl ProcessState {
    /// Starting or Running
    pub fn is_running(&self) -> bool {
        matches!(self, ProcessState::Starting | ProcessState::Running)
    }

    /// An OS process may exist in this state
    pub fn has_process(&self) -> bool {
        matches!(
            self,
            ProcessState::Starting | ProcessState::Running | ProcessState::Stopping
        )
    }

    /// States an explicit start event acts on
    pub fn can_start(&self) -> bool {
        matches!(
            self,
            ProcessState::Stopped | ProcessState::Backoff | ProcessState::Fatal
        )
    }

    /// Validate a transition against the lifecycle table
    pub fn can_transition_to(&self, new_state: ProcessState) -> bool {
        use ProcessState::*;

        matches!(
            (self, new_state),
            (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Backoff)
                | (Starting, Fatal)
                | (Starting, Stopping)
                | (Running, Backoff)
                | (Running, Fatal)
                | (Running, Stopping)
                | (Stopping, Stopped)
                | (Backoff, Starting)
                | (Backoff, Stopped)
                | (Fatal, Starting)
                | (Fatal, Stopped)
        )
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessState::Stopped => write!(f, "stopped"),
            ProcessState::Starting => write!(f, "starting"),
            ProcessState::Running => write!(f, "running"),
            ProcessState::Stopping => write!(f, "stopping"),
            ProcessState::Backoff => write!(f, "backoff"),
            ProcessState::Fatal => write!(f, "fatal"),
        }
    }
}

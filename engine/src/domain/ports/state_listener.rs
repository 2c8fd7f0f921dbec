//! StateListener port
//! Observer of process state transitions

use crate::domain::ProcessState;

/// Called synchronously inside every transition, in transition order
///
/// Implementations must return quickly; anything slow belongs on a queue.
pub trait StateListener: Send + Sync {
    fn on_transition(&self, program: &str, old: ProcessState, new: ProcessState);
}

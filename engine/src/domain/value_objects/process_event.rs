//! Events accepted by the process state machine

/// Input to [`ProcessFsm::operate`](crate::domain::ProcessFsm::operate)
///
/// `Start` and `Stop` come from callers. The other variants are raised by the
/// state machine's own reaper and timer tasks; each carries the run generation
/// it belongs to so an event from an earlier run cannot act on a later one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessEvent {
    Start,
    Stop,
    Exited { generation: u64, exit_code: i32 },
    StartupConfirmed { generation: u64 },
    BackoffElapsed { generation: u64 },
}

impl ProcessEvent {
    pub fn generation(&self) -> Option<u64> {
        match self {
            ProcessEvent::Start | ProcessEvent::Stop => None,
            ProcessEvent::Exited { generation, .. }
            | ProcessEvent::StartupConfirmed { generation }
            | ProcessEvent::BackoffElapsed { generation } => Some(*generation),
        }
    }
}

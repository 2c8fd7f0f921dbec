//! Ports the core depends on; implementations live in the infrastructure layer

#[cfg(test)]
pub mod mock_executor;
pub mod process_executor;
pub mod program_store;
pub mod state_listener;

#[cfg(test)]
pub use mock_executor::MockExecutor;
pub use process_executor::{ProcessExecutor, ProcessExitHandle, SpawnConfig, SpawnResult, StopSignal};
pub use program_store::{check_unique_names, ProgramStore};
pub use state_listener::StateListener;

pub mod process_event;
pub mod process_state;

pub use process_event::ProcessEvent;
pub use process_state::ProcessState;

pub mod event_bus;
pub mod process_fsm;

pub use event_bus::{BusStateListener, EventBus, Subscription};
pub use process_fsm::{ProcessFsm, ProcessSnapshot};

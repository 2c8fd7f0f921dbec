pub mod entities;
pub mod error;
pub mod ports;
pub mod services;
pub mod value_objects;

pub use entities::ProgramSpec;
pub use error::{DomainError, Result};
pub use services::{BusStateListener, EventBus, ProcessFsm, ProcessSnapshot, Subscription};
pub use value_objects::{ProcessEvent, ProcessState};

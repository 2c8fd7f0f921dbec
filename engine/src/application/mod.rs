//! Application layer
//! The supervisor that owns the program table and keeps it in line with the
//! desired program list

pub mod supervisor;

pub use supervisor::{ProgramStatus, Supervisor, UpdateOutcome};

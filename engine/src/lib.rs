//! suv engine
//!
//! Single-host process supervisor: keeps each declared program's OS process in
//! line with its desired state, restarts crashed programs under a bounded retry
//! budget and fans state changes out to subscribers.
//!
//! ## Layers
//!
//! - [`domain`]: program specs, the per-program state machine, the event bus and
//!   the ports the core depends on
//! - [`application`]: the [`Supervisor`](application::Supervisor) that owns the
//!   program table and reconciles it against desired state
//! - [`infrastructure`]: tokio process executor, YAML store, logging setup
//! - [`adapters`]: REST and websocket transport

pub mod adapters;
pub mod application;
pub mod constants;
pub mod domain;
pub mod infrastructure;

pub use application::{ProgramStatus, Supervisor, UpdateOutcome};
pub use domain::{DomainError, ProcessState, ProgramSpec, Result};

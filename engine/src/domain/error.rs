//! Domain-level errors
//! These represent business rule violations and the infrastructure failures the
//! core has to report back to callers

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    // Lookup / identity errors
    #[error("Program '{0}' not found")]
    ProgramNotFound(String),

    #[error("Program '{0}' already exists")]
    DuplicateProgram(String),

    // Validation errors
    #[error("Invalid program name: {0}")]
    InvalidName(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    // OS errors
    #[error("Failed to spawn '{command}': {reason}")]
    SpawnFailed { command: String, reason: String },

    #[error("Failed to signal pid {pid}: {reason}")]
    Signal { pid: u32, reason: String },

    // Desired-state storage
    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl DomainError {
    /// Rejected before any state was touched
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            DomainError::InvalidName(_)
                | DomainError::InvalidCommand(_)
                | DomainError::InvalidConfiguration(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DomainError>;

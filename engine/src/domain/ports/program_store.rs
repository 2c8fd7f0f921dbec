//! ProgramStore port
//! Source of truth for the desired program list

use crate::domain::{DomainError, ProgramSpec};
use async_trait::async_trait;
use std::collections::HashSet;

#[async_trait]
pub trait ProgramStore: Send + Sync {
    /// Read the declared programs in declaration order
    ///
    /// Fails on malformed input and on duplicate names.
    async fn load(&self) -> Result<Vec<ProgramSpec>, DomainError>;

    /// Replace the stored list
    async fn save(&self, programs: &[ProgramSpec]) -> Result<(), DomainError>;
}

/// Reject a list that declares the same name twice
pub fn check_unique_names(programs: &[ProgramSpec]) -> Result<(), DomainError> {
    let mut seen = HashSet::new();
    for program in programs {
        if !seen.insert(program.name.as_str()) {
            return Err(DomainError::DuplicateProgram(program.name.clone()));
        }
    }
    Ok(())
}

//! In-memory program store

use crate::domain::ports::{check_unique_names, ProgramStore};
use crate::domain::{DomainError, ProgramSpec};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Thread-safe store that keeps the desired program list in memory
#[derive(Clone, Default)]
pub struct InMemoryProgramStore {
    programs: Arc<RwLock<Vec<ProgramSpec>>>,
    saves: Arc<AtomicUsize>,
}

impl InMemoryProgramStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_programs(programs: Vec<ProgramSpec>) -> Self {
        Self {
            programs: Arc::new(RwLock::new(programs)),
            saves: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Current contents
    pub fn programs(&self) -> Vec<ProgramSpec> {
        self.programs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of successful saves so far
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProgramStore for InMemoryProgramStore {
    async fn load(&self) -> Result<Vec<ProgramSpec>, DomainError> {
        let programs = self.programs();
        check_unique_names(&programs)?;
        Ok(programs)
    }

    async fn save(&self, programs: &[ProgramSpec]) -> Result<(), DomainError> {
        *self.programs.write().unwrap_or_else(|e| e.into_inner()) = programs.to_vec();
        let saves = self.saves.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(programs = programs.len(), saves, "saved program definitions in memory");
        Ok(())
    }
}

//! ProcessExecutor port
//! Interface for spawning and signalling OS processes

use crate::domain::{DomainError, ProgramSpec};
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// Everything the executor needs to launch one run of a program
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnConfig {
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: Option<String>,
    pub env_vars: Vec<(String, String)>,
    pub environment_file: Option<String>,
    pub stdout: Option<String>, // File path, "inherit", or "null"
    pub stderr: Option<String>, // File path, "inherit", or "null"
}

impl SpawnConfig {
    pub fn from_spec(spec: &ProgramSpec) -> Self {
        Self {
            command: spec.command.clone(),
            args: spec.args.clone(),
            working_dir: spec.working_dir.clone(),
            env_vars: spec
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            environment_file: spec.environment_file.clone(),
            stdout: spec.stdout.clone(),
            stderr: spec.stderr.clone(),
        }
    }
}

/// Resolves with the exit code once the process is gone
pub type ProcessExitHandle = Pin<Box<dyn Future<Output = Result<i32, DomainError>> + Send>>;

/// Result of spawning a process
pub struct SpawnResult {
    pub pid: u32,
    pub exit_handle: ProcessExitHandle,
}

impl fmt::Debug for SpawnResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpawnResult").field("pid", &self.pid).finish()
    }
}

/// Signals the supervisor sends to a program
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    Terminate,
    Kill,
}

impl fmt::Display for StopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopSignal::Terminate => write!(f, "SIGTERM"),
            StopSignal::Kill => write!(f, "SIGKILL"),
        }
    }
}

/// Port for executing system processes
#[async_trait]
pub trait ProcessExecutor: Send + Sync {
    /// Launch a process; the returned handle resolves when it exits
    async fn spawn(&self, config: SpawnConfig) -> Result<SpawnResult, DomainError>;

    /// Deliver a signal to a running process
    async fn signal(&self, pid: u32, signal: StopSignal) -> Result<(), DomainError>;
}

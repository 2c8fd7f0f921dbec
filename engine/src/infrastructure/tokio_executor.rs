//! Tokio Process Executor
//! Real implementation of the ProcessExecutor port: spawns with
//! `tokio::process` and delivers signals with `nix`

use crate::domain::ports::{
    ProcessExecutor, ProcessExitHandle, SpawnConfig, SpawnResult, StopSignal,
};
use crate::domain::DomainError;
use crate::infrastructure::environment_file::parse_environment_file;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::process::{ExitStatus, Stdio};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

#[derive(Debug, Default)]
pub struct TokioProcessExecutor;

impl TokioProcessExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Map a stdout/stderr setting to a handle: "null" (default), "inherit" or
    /// a file opened for append
    fn configure_output(target: Option<&str>, stream: &str) -> Result<Stdio, DomainError> {
        match target {
            None | Some("null") => Ok(Stdio::null()),
            Some("inherit") => Ok(Stdio::inherit()),
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|e| {
                        DomainError::InvalidConfiguration(format!(
                            "Failed to open {stream} file '{path}': {e}"
                        ))
                    })?;
                Ok(Stdio::from(file))
            }
        }
    }

    /// Environment file first, explicit variables override it
    fn environment(config: &SpawnConfig) -> Result<BTreeMap<String, String>, DomainError> {
        let mut vars = BTreeMap::new();
        if let Some(ref env_file) = config.environment_file {
            vars.extend(parse_environment_file(env_file)?);
        }
        vars.extend(config.env_vars.iter().cloned());
        Ok(vars)
    }

    fn build_command(config: &SpawnConfig) -> Result<Command, DomainError> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args);

        if let Some(ref dir) = config.working_dir {
            debug!(working_dir = %dir, "setting working directory");
            cmd.current_dir(dir);
        }

        let vars = Self::environment(config)?;
        if !vars.is_empty() {
            debug!(count = vars.len(), "setting environment variables");
            cmd.envs(vars);
        }

        cmd.stdin(Stdio::null());
        cmd.stdout(Self::configure_output(config.stdout.as_deref(), "stdout")?);
        cmd.stderr(Self::configure_output(config.stderr.as_deref(), "stderr")?);
        Ok(cmd)
    }
}

/// Exit code, or 128 + signal number for a process killed by a signal
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

#[async_trait]
impl ProcessExecutor for TokioProcessExecutor {
    async fn spawn(&self, config: SpawnConfig) -> Result<SpawnResult, DomainError> {
        info!(command = %config.command, args = ?config.args, "spawning process");

        let spawn_failed = |reason: String| DomainError::SpawnFailed {
            command: config.command.clone(),
            reason,
        };
        let mut cmd = Self::build_command(&config).map_err(|e| spawn_failed(e.to_string()))?;
        let mut child = cmd.spawn().map_err(|e| {
            error!(command = %config.command, error = %e, "failed to spawn process");
            spawn_failed(e.to_string())
        })?;
        let pid = child
            .id()
            .ok_or_else(|| spawn_failed("process exited before its pid was read".to_string()))?;

        let exit_handle: ProcessExitHandle = Box::pin(async move {
            let status = child.wait().await.map_err(|e| {
                error!(pid, error = %e, "failed to wait for process");
                DomainError::SpawnFailed {
                    command: format!("pid {pid}"),
                    reason: format!("wait failed: {e}"),
                }
            })?;
            let code = exit_code(status);
            debug!(pid, exit_code = code, "process exited");
            Ok(code)
        });

        Ok(SpawnResult { pid, exit_handle })
    }

    #[cfg(unix)]
    async fn signal(&self, pid: u32, signal: StopSignal) -> Result<(), DomainError> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let sig = match signal {
            StopSignal::Terminate => Signal::SIGTERM,
            StopSignal::Kill => Signal::SIGKILL,
        };
        let raw = i32::try_from(pid).map_err(|_| DomainError::Signal {
            pid,
            reason: "pid out of range".to_string(),
        })?;

        debug!(pid, %signal, "sending signal");
        kill(Pid::from_raw(raw), sig).map_err(|e| {
            warn!(pid, %signal, error = %e, "failed to send signal");
            DomainError::Signal {
                pid,
                reason: e.to_string(),
            }
        })
    }

    #[cfg(not(unix))]
    async fn signal(&self, pid: u32, _signal: StopSignal) -> Result<(), DomainError> {
        Err(DomainError::Signal {
            pid,
            reason: "signals are not supported on this platform".to_string(),
        })
    }
}

//! Scriptable executor for state machine tests
//!
//! Every spawn hands out a fresh pid whose exit is triggered by the test with
//! [`MockExecutor::exit`]. Signals are recorded; a terminate or kill also
//! resolves the exit handle unless the pid was marked stubborn.

use crate::domain::ports::{ProcessExecutor, SpawnConfig, SpawnResult, StopSignal};
use crate::domain::DomainError;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use tokio::sync::oneshot;

#[derive(Default)]
pub struct MockExecutor {
    next_pid: AtomicU32,
    fail_spawns: Mutex<bool>,
    stubborn: Mutex<bool>,
    exits: Mutex<HashMap<u32, oneshot::Sender<i32>>>,
    signals: Mutex<Vec<(u32, StopSignal)>>,
    spawned: Mutex<Vec<u32>>,
    alive: Mutex<HashSet<u32>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self {
            next_pid: AtomicU32::new(1000),
            ..Default::default()
        }
    }

    pub fn fail_spawns(&self, fail: bool) {
        *self.fail_spawns.lock().unwrap() = fail;
    }

    /// Ignore SIGTERM (SIGKILL still works)
    pub fn ignore_terminate(&self, stubborn: bool) {
        *self.stubborn.lock().unwrap() = stubborn;
    }

    /// Simulate the process exiting on its own
    pub fn exit(&self, pid: u32, exit_code: i32) {
        self.alive.lock().unwrap().remove(&pid);
        if let Some(tx) = self.exits.lock().unwrap().remove(&pid) {
            let _ = tx.send(exit_code);
        }
    }

    pub fn spawned(&self) -> Vec<u32> {
        self.spawned.lock().unwrap().clone()
    }

    pub fn last_pid(&self) -> Option<u32> {
        self.spawned.lock().unwrap().last().copied()
    }

    pub fn signals(&self) -> Vec<(u32, StopSignal)> {
        self.signals.lock().unwrap().clone()
    }

    pub fn alive_count(&self) -> usize {
        self.alive.lock().unwrap().len()
    }
}

#[async_trait]
impl ProcessExecutor for MockExecutor {
    async fn spawn(&self, config: SpawnConfig) -> Result<SpawnResult, DomainError> {
        if *self.fail_spawns.lock().unwrap() {
            return Err(DomainError::SpawnFailed {
                command: config.command,
                reason: "No such file or directory".to_string(),
            });
        }
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.exits.lock().unwrap().insert(pid, tx);
        self.spawned.lock().unwrap().push(pid);
        self.alive.lock().unwrap().insert(pid);

        let exit_handle = Box::pin(async move {
            rx.await
                .map_err(|_| DomainError::InvalidConfiguration("mock exit dropped".to_string()))
        });
        Ok(SpawnResult { pid, exit_handle })
    }

    async fn signal(&self, pid: u32, signal: StopSignal) -> Result<(), DomainError> {
        self.signals.lock().unwrap().push((pid, signal));
        let ignored = signal == StopSignal::Terminate && *self.stubborn.lock().unwrap();
        if !ignored {
            self.exit(pid, 128 + if signal == StopSignal::Kill { 9 } else { 15 });
        }
        Ok(())
    }
}

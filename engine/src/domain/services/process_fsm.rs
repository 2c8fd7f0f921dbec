//! Process state machine
//!
//! One [`ProcessFsm`] owns the lifecycle of one program's OS process: spawning,
//! the start grace period, crash recovery with a bounded retry budget, backoff
//! timers and termination. All transitions go through a per-instance lock, so
//! concurrent events for the same program are linearized while different
//! programs never wait on each other.
//!
//! Reaper and timer tasks feed internal events back into the machine. Each run
//! gets a new generation number and every internal event carries the
//! generation it was created for; events from an earlier run are dropped.

use crate::constants::program::{KILL_WAIT_SECS, SPAWN_FAILURE_EXIT_CODE};
use crate::domain::ports::{
    ProcessExecutor, ProcessExitHandle, SpawnConfig, SpawnResult, StateListener, StopSignal,
};
use crate::domain::{ProcessEvent, ProcessState, ProgramSpec};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Point-in-time view of a state machine
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSnapshot {
    pub state: ProcessState,
    pub retry_count: u32,
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
    pub started_at: Option<SystemTime>,
    pub stopped_at: Option<SystemTime>,
}

#[derive(Default)]
struct FsmInner {
    state: ProcessState,
    retry_count: u32,
    generation: u64,
    pid: Option<u32>,
    exit_code: Option<i32>,
    started_at: Option<SystemTime>,
    stopped_at: Option<SystemTime>,
    /// Grace timer while starting, retry timer while backing off
    timer: Option<JoinHandle<()>>,
    /// SIGKILL escalation while stopping
    escalation: Option<JoinHandle<()>>,
}

impl FsmInner {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    fn cancel_escalation(&mut self) {
        if let Some(escalation) = self.escalation.take() {
            escalation.abort();
        }
    }
}

pub struct ProcessFsm {
    spec: ProgramSpec,
    executor: Arc<dyn ProcessExecutor>,
    listeners: Vec<Arc<dyn StateListener>>,
    inner: Mutex<FsmInner>,
    state_tx: watch::Sender<ProcessState>,
    retired: AtomicBool,
    me: Weak<ProcessFsm>,
}

impl ProcessFsm {
    /// Create a machine in `Stopped`. Must be called inside a tokio runtime
    /// before any event is applied.
    pub fn new(
        spec: ProgramSpec,
        executor: Arc<dyn ProcessExecutor>,
        listeners: Vec<Arc<dyn StateListener>>,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ProcessState::Stopped);
        Arc::new_cyclic(|me| Self {
            spec,
            executor,
            listeners,
            inner: Mutex::new(FsmInner::default()),
            state_tx,
            retired: AtomicBool::new(false),
            me: me.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &ProgramSpec {
        &self.spec
    }

    /// Current state, without taking the transition lock
    pub fn state(&self) -> ProcessState {
        *self.state_tx.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    pub async fn snapshot(&self) -> ProcessSnapshot {
        let inner = self.inner.lock().await;
        ProcessSnapshot {
            state: inner.state,
            retry_count: inner.retry_count,
            pid: inner.pid,
            exit_code: inner.exit_code,
            started_at: inner.started_at,
            stopped_at: inner.stopped_at,
        }
    }

    /// Mark this machine as superseded; later start events are ignored
    pub fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
    }

    /// Wait until the state satisfies `pred`; false on timeout
    pub async fn wait_for_state<F>(&self, pred: F, timeout: Duration) -> bool
    where
        F: Fn(ProcessState) -> bool,
    {
        let mut rx = self.state_tx.subscribe();
        let reached = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|state| pred(*state))).await,
            Ok(Ok(_))
        );
        reached
    }

    /// Apply an event and return the resulting state
    ///
    /// The transition runs on its own task, so dropping the returned future
    /// (a client hanging up, say) cannot leave the machine half-way through a
    /// spawn.
    pub async fn operate(&self, event: ProcessEvent) -> ProcessState {
        let Some(me) = self.me.upgrade() else {
            return self.state();
        };
        match tokio::spawn(async move { me.apply(event).await }).await {
            Ok(state) => state,
            Err(e) => {
                error!(program = %self.spec.name, error = %e, "transition task failed");
                self.state()
            }
        }
    }

    async fn apply(&self, event: ProcessEvent) -> ProcessState {
        use ProcessEvent::*;
        use ProcessState::*;

        let mut inner = self.inner.lock().await;

        if let Some(generation) = event.generation() {
            if generation != inner.generation {
                debug!(
                    program = %self.spec.name,
                    ?event,
                    current = inner.generation,
                    "dropping event from an earlier run"
                );
                return inner.state;
            }
        }

        match (inner.state, event) {
            (state, Start) if state.can_start() => {
                if self.is_retired() {
                    warn!(program = %self.spec.name, "ignoring start on a retired program");
                    return inner.state;
                }
                if inner.state == Fatal {
                    inner.retry_count = 0;
                }
                inner.cancel_timer();
                self.transition(&mut inner, Starting);
                self.spawn_locked(&mut inner).await;
            }
            (Starting | Running, Stop) => self.begin_stop(&mut inner).await,
            (Backoff | Fatal, Stop) => {
                inner.cancel_timer();
                inner.stopped_at = Some(SystemTime::now());
                self.transition(&mut inner, Stopped);
            }
            (Starting, StartupConfirmed { .. }) => {
                inner.timer = None;
                inner.retry_count = 0;
                self.transition(&mut inner, Running);
            }
            (Starting | Running, Exited { exit_code, .. }) => {
                self.handle_exit_locked(&mut inner, exit_code);
            }
            (Stopping, Exited { exit_code, .. }) => {
                inner.cancel_escalation();
                inner.pid = None;
                inner.exit_code = Some(exit_code);
                inner.stopped_at = Some(SystemTime::now());
                self.transition(&mut inner, Stopped);
            }
            (Backoff, BackoffElapsed { .. }) => {
                inner.timer = None;
                if self.is_retired() {
                    inner.stopped_at = Some(SystemTime::now());
                    self.transition(&mut inner, Stopped);
                } else {
                    self.transition(&mut inner, Starting);
                    self.spawn_locked(&mut inner).await;
                }
            }
            (state, event) => {
                debug!(program = %self.spec.name, %state, ?event, "event has no effect");
            }
        }

        inner.state
    }

    fn transition(&self, inner: &mut FsmInner, new: ProcessState) {
        let old = inner.state;
        if !old.can_transition_to(new) {
            error!(program = %self.spec.name, from = %old, to = %new, "unexpected transition");
        }
        inner.state = new;
        self.state_tx.send_replace(new);
        info!(program = %self.spec.name, from = %old, to = %new, "state changed");
        for listener in &self.listeners {
            listener.on_transition(&self.spec.name, old, new);
        }
    }

    async fn spawn_locked(&self, inner: &mut FsmInner) {
        inner.generation += 1;
        let generation = inner.generation;
        inner.exit_code = None;

        match self.executor.spawn(SpawnConfig::from_spec(&self.spec)).await {
            Ok(SpawnResult { pid, exit_handle }) => {
                info!(
                    program = %self.spec.name,
                    pid,
                    command = %self.spec.command,
                    "spawned (pid={pid})"
                );
                inner.pid = Some(pid);
                inner.started_at = Some(SystemTime::now());
                self.watch_exit(generation, pid, exit_handle);
                inner.timer = Some(self.schedule(
                    self.spec.start_grace(),
                    ProcessEvent::StartupConfirmed { generation },
                ));
            }
            Err(e) => {
                warn!(program = %self.spec.name, error = %e, "spawn failed");
                self.handle_exit_locked(inner, SPAWN_FAILURE_EXIT_CODE);
            }
        }
    }

    /// Retry policy for an exit nobody asked for
    fn handle_exit_locked(&self, inner: &mut FsmInner, exit_code: i32) {
        inner.cancel_timer();
        inner.pid = None;
        inner.exit_code = Some(exit_code);
        inner.stopped_at = Some(SystemTime::now());

        if inner.retry_count < self.spec.max_retries {
            inner.retry_count += 1;
            warn!(
                program = %self.spec.name,
                exit_code,
                retry = inner.retry_count,
                max_retries = self.spec.max_retries,
                backoff_secs = self.spec.backoff_secs,
                "process exited unexpectedly, backing off"
            );
            self.transition(inner, ProcessState::Backoff);
            inner.timer = Some(self.schedule(
                self.spec.backoff(),
                ProcessEvent::BackoffElapsed {
                    generation: inner.generation,
                },
            ));
        } else {
            error!(
                program = %self.spec.name,
                exit_code,
                max_retries = self.spec.max_retries,
                "retries exhausted, giving up"
            );
            self.transition(inner, ProcessState::Fatal);
        }
    }

    async fn begin_stop(&self, inner: &mut FsmInner) {
        inner.cancel_timer();
        self.transition(inner, ProcessState::Stopping);

        let Some(pid) = inner.pid else {
            inner.stopped_at = Some(SystemTime::now());
            self.transition(inner, ProcessState::Stopped);
            return;
        };

        info!(program = %self.spec.name, pid, "sending SIGTERM");
        if let Err(e) = self.executor.signal(pid, StopSignal::Terminate).await {
            warn!(program = %self.spec.name, pid, error = %e, "failed to send SIGTERM");
        }
        inner.cancel_escalation();
        inner.escalation = Some(self.schedule_escalation(inner.generation, pid));
    }

    /// Forced stop used during shutdown
    ///
    /// Retires the machine, terminates the process, escalates to SIGKILL after
    /// the stop timeout and, if the reaper still has not reported, records the
    /// stop anyway so observers never keep a stale running state.
    pub async fn force_stop(&self) -> ProcessState {
        self.retire();
        {
            let mut inner = self.inner.lock().await;
            match inner.state {
                ProcessState::Stopped => return ProcessState::Stopped,
                ProcessState::Starting | ProcessState::Running => {
                    self.begin_stop(&mut inner).await;
                }
                ProcessState::Backoff | ProcessState::Fatal => {
                    inner.cancel_timer();
                    inner.stopped_at = Some(SystemTime::now());
                    self.transition(&mut inner, ProcessState::Stopped);
                    return ProcessState::Stopped;
                }
                ProcessState::Stopping => {}
            }
        }

        let stopped = |state: ProcessState| state == ProcessState::Stopped;
        if self.wait_for_state(stopped, self.spec.stop_timeout()).await {
            return ProcessState::Stopped;
        }

        let pid = {
            let inner = self.inner.lock().await;
            inner.pid.filter(|_| inner.state.has_process())
        };
        if let Some(pid) = pid {
            warn!(
                program = %self.spec.name,
                pid,
                stop_timeout_secs = self.spec.stop_timeout_secs,
                "stop timeout reached, sending SIGKILL"
            );
            if let Err(e) = self.executor.signal(pid, StopSignal::Kill).await {
                warn!(program = %self.spec.name, pid, error = %e, "failed to send SIGKILL");
            }
        }
        if self
            .wait_for_state(stopped, Duration::from_secs_f64(KILL_WAIT_SECS))
            .await
        {
            return ProcessState::Stopped;
        }

        let mut inner = self.inner.lock().await;
        if inner.state != ProcessState::Stopped {
            error!(
                program = %self.spec.name,
                pid = ?inner.pid,
                "process did not report exit, marking it stopped"
            );
            inner.cancel_timer();
            inner.cancel_escalation();
            inner.pid = None;
            // Any late exit report belongs to a run we have given up on.
            inner.generation += 1;
            inner.stopped_at = Some(SystemTime::now());
            self.transition(&mut inner, ProcessState::Stopped);
        }
        inner.state
    }

    fn watch_exit(&self, generation: u64, pid: u32, exit_handle: ProcessExitHandle) {
        let Some(fsm) = self.me.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            let exit_code = match exit_handle.await {
                Ok(code) => code,
                Err(e) => {
                    warn!(
                        program = %fsm.spec.name,
                        pid,
                        error = %e,
                        "error waiting for process exit, treating as failure"
                    );
                    1
                }
            };
            info!(program = %fsm.spec.name, pid, exit_code, "exited with {exit_code}");
            fsm.apply(ProcessEvent::Exited {
                generation,
                exit_code,
            })
            .await;
        });
    }

    /// Fire `event` after `delay`. Aborting the handle only ever cancels the
    /// sleep: the event itself is applied on a separate task.
    fn schedule(&self, delay: Duration, event: ProcessEvent) -> JoinHandle<()> {
        let me = self.me.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(fsm) = me.upgrade() {
                tokio::spawn(async move {
                    fsm.apply(event).await;
                });
            }
        })
    }

    fn schedule_escalation(&self, generation: u64, pid: u32) -> JoinHandle<()> {
        let me = self.me.clone();
        let delay = self.spec.stop_timeout();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(fsm) = me.upgrade() {
                tokio::spawn(async move {
                    fsm.escalate(generation, pid).await;
                });
            }
        })
    }

    async fn escalate(&self, generation: u64, pid: u32) {
        let inner = self.inner.lock().await;
        if inner.generation != generation || inner.state != ProcessState::Stopping {
            return;
        }
        warn!(
            program = %self.spec.name,
            pid,
            stop_timeout_secs = self.spec.stop_timeout_secs,
            "stop timeout reached, sending SIGKILL"
        );
        if let Err(e) = self.executor.signal(pid, StopSignal::Kill).await {
            warn!(program = %self.spec.name, pid, error = %e, "failed to send SIGKILL");
        }
    }
}

impl Drop for ProcessFsm {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        inner.cancel_timer();
        inner.cancel_escalation();
    }
}

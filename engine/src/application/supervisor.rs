//! Supervisor
//!
//! Owns the program table: the declaration-ordered names, the desired spec of
//! every program and the live state machine driving it. Every membership change
//! goes through here; the table lock is a plain mutex that is only held to read
//! or swap entries, never across an await.
//!
//! Changing the spec of a known program replaces its state machine in place on
//! a background task: the old machine is retired and stopped, and only once it
//! reports `Stopped` is a new one built from the latest desired spec and, if the
//! old one was running, started. A name therefore never has two processes
//! alive at once.

use crate::constants::program::REPLACE_WAIT_SLACK_SECS;
use crate::domain::ports::{check_unique_names, ProcessExecutor, ProgramStore, StateListener};
use crate::domain::{
    BusStateListener, DomainError, EventBus, ProcessEvent, ProcessFsm, ProcessState, ProgramSpec,
    Result, Subscription,
};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinSet;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// What `add_or_update` did with a spec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// New program registered
    Added,
    /// Spec equal to the registered one; nothing to do
    Unchanged,
    /// Spec changed; the state machine is being replaced in the background
    Replaced,
}

/// Membership a change requires of its program name
#[derive(Debug, Clone, Copy)]
enum Expect {
    Any,
    New,
    Existing,
}

/// Read model for listings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgramStatus {
    #[serde(flatten)]
    pub spec: ProgramSpec,
    pub state: ProcessState,
    pub retry_count: u32,
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
    /// Unix seconds
    pub started_at: Option<u64>,
    /// Unix seconds
    pub stopped_at: Option<u64>,
}

fn unix_secs(time: Option<SystemTime>) -> Option<u64> {
    time.and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|elapsed| elapsed.as_secs())
}

#[derive(Default)]
struct ProgramTable {
    order: Vec<String>,
    specs: HashMap<String, ProgramSpec>,
    processes: HashMap<String, Arc<ProcessFsm>>,
}

pub struct Supervisor {
    store: Arc<dyn ProgramStore>,
    executor: Arc<dyn ProcessExecutor>,
    bus: Arc<EventBus>,
    table: Mutex<ProgramTable>,
    /// Serializes replace and removal work per program name
    name_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    /// Saves are serialized so the last writer always writes the latest table
    save_lock: tokio::sync::Mutex<()>,
    /// One reconciliation at a time; it is the only path holding several name
    /// locks at once
    reconcile_lock: tokio::sync::Mutex<()>,
    tracker: TaskTracker,
    me: Weak<Supervisor>,
}

impl Supervisor {
    pub fn new(
        store: Arc<dyn ProgramStore>,
        executor: Arc<dyn ProcessExecutor>,
        bus: Arc<EventBus>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            store,
            executor,
            bus,
            table: Mutex::new(ProgramTable::default()),
            name_locks: Mutex::new(HashMap::new()),
            save_lock: tokio::sync::Mutex::new(()),
            reconcile_lock: tokio::sync::Mutex::new(()),
            tracker: TaskTracker::new(),
            me: me.clone(),
        })
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    /// Read the store and bring the table in line with it, without writing the
    /// store back
    pub async fn load(&self) -> Result<()> {
        let specs = self.store.load().await?;
        info!(programs = specs.len(), "loaded program definitions");
        self.apply_desired(specs, false).await
    }

    /// Re-read the store and reconcile
    pub async fn reload(&self) -> Result<()> {
        let specs = self.store.load().await?;
        info!(programs = specs.len(), "reloading program definitions");
        self.reconcile(specs).await
    }

    /// Register a new program or update an existing one
    ///
    /// The table is updated, the store written and a `"<name> add or update"`
    /// notification published in every case; a failed save is reported after
    /// the change has been applied and announced.
    pub async fn add_or_update(&self, spec: ProgramSpec) -> Result<UpdateOutcome> {
        self.apply_change(spec, Expect::Any).await
    }

    /// Create a program; the name must not be taken
    pub async fn create_program(&self, spec: ProgramSpec) -> Result<UpdateOutcome> {
        self.apply_change(spec, Expect::New).await
    }

    /// Update a registered program
    pub async fn update_program(&self, spec: ProgramSpec) -> Result<UpdateOutcome> {
        self.apply_change(spec, Expect::Existing).await
    }

    async fn apply_change(&self, spec: ProgramSpec, expect: Expect) -> Result<UpdateOutcome> {
        spec.validate()?;
        let name = spec.name.clone();

        // Membership is checked under the same lock that applies the change.
        let (outcome, to_start) = {
            let mut table = self.table();
            let known = table.specs.contains_key(&name);
            match expect {
                Expect::New if known => return Err(DomainError::DuplicateProgram(name)),
                Expect::Existing if !known => return Err(DomainError::ProgramNotFound(name)),
                _ => {}
            }
            self.apply_locked(&mut table, spec)
        };
        if let Some(fsm) = to_start {
            self.start_new(fsm).await;
        }

        let saved = self.persist().await;
        self.bus.publish(format!("{name} add or update"));
        saved.map(|_| outcome)
    }

    /// Remove a program, stopping its process
    pub async fn remove_program(&self, name: &str) -> Result<()> {
        let lock = self.name_lock(name);
        let _guard = lock.lock().await;

        let fsm = {
            let mut table = self.table();
            if table.specs.remove(name).is_none() {
                return Err(DomainError::ProgramNotFound(name.to_string()));
            }
            table.order.retain(|n| n != name);
            table.processes.remove(name)
        };
        info!(program = %name, "removing program");
        if let Some(fsm) = fsm {
            Self::retire_and_stop(&fsm).await;
        }

        let saved = self.persist().await;
        self.bus.publish(format!("{name} removed"));
        saved
    }

    /// Converge the table on `specs`
    ///
    /// Rejects the whole list before touching anything if a spec is invalid or
    /// a name repeats. Afterwards the table holds exactly the names of `specs`,
    /// in that order.
    pub async fn reconcile(&self, specs: Vec<ProgramSpec>) -> Result<()> {
        self.apply_desired(specs, true).await
    }

    async fn apply_desired(&self, specs: Vec<ProgramSpec>, save: bool) -> Result<()> {
        for spec in &specs {
            spec.validate()?;
        }
        check_unique_names(&specs)?;
        let _reconciling = self.reconcile_lock.lock().await;

        let names: Vec<String> = specs.iter().map(|s| s.name.clone()).collect();
        let keep: HashSet<String> = names.iter().cloned().collect();

        // Take the name lock of every program about to be dropped before it
        // leaves the table, so a re-add of the same name cannot start until
        // the old process is gone. Names that appear while we wait are picked
        // up on the next pass.
        let mut held: HashMap<String, OwnedMutexGuard<()>> = HashMap::new();
        let (to_start, removed) = loop {
            let missing: Vec<String> = self
                .table()
                .order
                .iter()
                .filter(|n| !keep.contains(*n) && !held.contains_key(*n))
                .cloned()
                .collect();
            for name in missing {
                let guard = self.name_lock(&name).lock_owned().await;
                held.insert(name, guard);
            }

            let applied = {
                let mut table = self.table();
                let complete = table
                    .order
                    .iter()
                    .all(|n| keep.contains(n) || held.contains_key(n));
                complete.then(|| {
                    let mut to_start = Vec::new();
                    for spec in specs.iter().cloned() {
                        let (_, fsm) = self.apply_locked(&mut table, spec);
                        to_start.extend(fsm);
                    }

                    let gone: Vec<String> = table
                        .order
                        .iter()
                        .filter(|n| !keep.contains(n.as_str()))
                        .cloned()
                        .collect();
                    let mut removed = Vec::with_capacity(gone.len());
                    for name in gone {
                        table.specs.remove(&name);
                        let guard = held.remove(&name);
                        if let (Some(fsm), Some(guard)) = (table.processes.remove(&name), guard) {
                            removed.push((fsm, guard));
                        }
                    }
                    table.order = names.clone();
                    (to_start, removed)
                })
            };
            if let Some(applied) = applied {
                break applied;
            }
        };
        // Guards for names that vanished while we waited.
        drop(held);

        let mut stops = JoinSet::new();
        for (fsm, guard) in removed {
            info!(program = %fsm.name(), "program no longer declared, removing");
            self.bus.publish(format!("{} removed", fsm.name()));
            stops.spawn(async move {
                Self::retire_and_stop(&fsm).await;
                drop(guard);
            });
        }
        while stops.join_next().await.is_some() {}

        for fsm in to_start {
            self.start_new(fsm).await;
        }
        for name in &names {
            self.bus.publish(format!("{name} add or update"));
        }

        if save {
            self.persist().await
        } else {
            Ok(())
        }
    }

    /// Table mutation shared by `add_or_update` and reconciliation; returns the
    /// new machine when it has to be auto-started
    fn apply_locked(
        &self,
        table: &mut ProgramTable,
        spec: ProgramSpec,
    ) -> (UpdateOutcome, Option<Arc<ProcessFsm>>) {
        let name = spec.name.clone();
        let unchanged = table.specs.get(&name).map(|current| *current == spec);
        match unchanged {
            None => {
                info!(program = %name, command = %spec.command, "registering program");
                let auto_start = spec.auto_start;
                let fsm = self.build_fsm(spec.clone());
                table.order.push(name.clone());
                table.specs.insert(name.clone(), spec);
                table.processes.insert(name, fsm.clone());
                (UpdateOutcome::Added, auto_start.then_some(fsm))
            }
            Some(true) => {
                debug!(program = %name, "spec unchanged");
                (UpdateOutcome::Unchanged, None)
            }
            Some(false) => {
                info!(program = %name, "spec changed, replacing");
                table.specs.insert(name.clone(), spec);
                self.spawn_replace(name);
                (UpdateOutcome::Replaced, None)
            }
        }
    }

    fn build_fsm(&self, spec: ProgramSpec) -> Arc<ProcessFsm> {
        let listener: Arc<dyn StateListener> = Arc::new(BusStateListener::new(self.bus.clone()));
        ProcessFsm::new(spec, self.executor.clone(), vec![listener])
    }

    /// Auto-start a freshly registered machine once any removal of the same
    /// name has finished stopping
    async fn start_new(&self, fsm: Arc<ProcessFsm>) {
        let lock = self.name_lock(fsm.name());
        let _guard = lock.lock().await;
        fsm.operate(ProcessEvent::Start).await;
    }

    fn spawn_replace(&self, name: String) {
        let Some(me) = self.me.upgrade() else {
            return;
        };
        self.tracker.spawn(async move {
            me.replace_in_place(&name).await;
        });
    }

    async fn replace_in_place(&self, name: &str) {
        let lock = self.name_lock(name);
        let _guard = lock.lock().await;

        let (old, desired) = {
            let table = self.table();
            match (table.processes.get(name), table.specs.get(name)) {
                (Some(fsm), Some(spec)) => (fsm.clone(), spec.clone()),
                _ => {
                    debug!(program = %name, "program removed before replace ran");
                    return;
                }
            }
        };
        // An earlier replace may already have picked up this spec.
        if *old.spec() == desired {
            return;
        }

        let was_running = old.is_running();
        Self::retire_and_stop(&old).await;

        let fsm = {
            let mut table = self.table();
            let still_current = table
                .processes
                .get(name)
                .map_or(false, |current| Arc::ptr_eq(current, &old));
            let Some(spec) = table.specs.get(name).cloned().filter(|_| still_current) else {
                debug!(program = %name, "program changed membership during replace");
                return;
            };
            let fsm = self.build_fsm(spec);
            table.processes.insert(name.to_string(), fsm.clone());
            fsm
        };
        info!(program = %name, restart = was_running, "replaced program");

        if was_running {
            fsm.operate(ProcessEvent::Start).await;
        }
    }

    /// Retire a machine and wait for its process to go away
    async fn retire_and_stop(fsm: &ProcessFsm) {
        fsm.retire();
        fsm.operate(ProcessEvent::Stop).await;
        let wait = fsm.spec().stop_timeout() + Duration::from_secs_f64(REPLACE_WAIT_SLACK_SECS);
        if !fsm
            .wait_for_state(|state| state == ProcessState::Stopped, wait)
            .await
        {
            warn!(program = %fsm.name(), "program did not stop in time, forcing");
            fsm.force_stop().await;
        }
    }

    async fn persist(&self) -> Result<()> {
        let _guard = self.save_lock.lock().await;
        let specs = self.desired_specs();
        self.store.save(&specs).await.map_err(|e| {
            error!(error = %e, "failed to save program definitions");
            e
        })
    }

    /// Desired specs in declaration order
    pub fn desired_specs(&self) -> Vec<ProgramSpec> {
        let table = self.table();
        table
            .order
            .iter()
            .filter_map(|name| table.specs.get(name).cloned())
            .collect()
    }

    pub fn program_names(&self) -> Vec<String> {
        self.table().order.clone()
    }

    pub async fn start_program(&self, name: &str) -> Result<ProcessState> {
        let fsm = self.process(name)?;
        Ok(fsm.operate(ProcessEvent::Start).await)
    }

    pub async fn stop_program(&self, name: &str) -> Result<ProcessState> {
        let fsm = self.process(name)?;
        Ok(fsm.operate(ProcessEvent::Stop).await)
    }

    pub fn program_state(&self, name: &str) -> Result<ProcessState> {
        Ok(self.process(name)?.state())
    }

    pub async fn program_status(&self, name: &str) -> Result<ProgramStatus> {
        let fsm = self.process(name)?;
        let spec = self
            .table()
            .specs
            .get(name)
            .cloned()
            .unwrap_or_else(|| fsm.spec().clone());
        Ok(Self::status(spec, &fsm).await)
    }

    /// Status of every program in declaration order
    pub async fn list_programs(&self) -> Vec<ProgramStatus> {
        let entries: Vec<(ProgramSpec, Arc<ProcessFsm>)> = {
            let table = self.table();
            table
                .order
                .iter()
                .filter_map(|name| {
                    let spec = table.specs.get(name)?;
                    let fsm = table.processes.get(name)?;
                    Some((spec.clone(), fsm.clone()))
                })
                .collect()
        };

        let mut statuses = Vec::with_capacity(entries.len());
        for (spec, fsm) in entries {
            statuses.push(Self::status(spec, &fsm).await);
        }
        statuses
    }

    async fn status(spec: ProgramSpec, fsm: &ProcessFsm) -> ProgramStatus {
        let snapshot = fsm.snapshot().await;
        ProgramStatus {
            spec,
            state: snapshot.state,
            retry_count: snapshot.retry_count,
            pid: snapshot.pid,
            exit_code: snapshot.exit_code,
            started_at: unix_secs(snapshot.started_at),
            stopped_at: unix_secs(snapshot.stopped_at),
        }
    }

    /// Wait for in-flight replacements
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Stop every program, each on its own task so one that hangs cannot hold
    /// up the rest
    pub async fn shutdown(&self) {
        info!("shutting down supervisor");
        self.tracker.close();
        self.tracker.wait().await;

        let processes: Vec<Arc<ProcessFsm>> = self.table().processes.values().cloned().collect();
        let mut stops = JoinSet::new();
        for fsm in processes {
            stops.spawn(async move {
                let state = fsm.force_stop().await;
                (fsm.name().to_string(), state)
            });
        }
        while let Some(joined) = stops.join_next().await {
            match joined {
                Ok((name, state)) => debug!(program = %name, %state, "program stopped"),
                Err(e) => error!(error = %e, "stop task failed"),
            }
        }
        info!("all programs stopped");
    }

    fn process(&self, name: &str) -> Result<Arc<ProcessFsm>> {
        self.table()
            .processes
            .get(name)
            .cloned()
            .ok_or_else(|| DomainError::ProgramNotFound(name.to_string()))
    }

    fn name_lock(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.name_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(name.to_string()).or_default().clone()
    }

    fn table(&self) -> MutexGuard<'_, ProgramTable> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }
}

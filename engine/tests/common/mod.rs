#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use suv_engine::domain::{EventBus, Subscription};
use suv_engine::infrastructure::{TokioProcessExecutor, YamlProgramStore};
use suv_engine::{ProcessState, ProgramSpec, Supervisor};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Supervisor wired to real processes and a YAML store in `config_dir`
pub fn supervisor(config_dir: &Path) -> Arc<Supervisor> {
    Supervisor::new(
        Arc::new(YamlProgramStore::in_dir(config_dir)),
        Arc::new(TokioProcessExecutor::new()),
        EventBus::new(),
    )
}

/// `/bin/sleep 30` that becomes running quickly and stops quickly
pub fn sleeper(name: &str) -> ProgramSpec {
    ProgramSpec::builder(name, "/bin/sleep")
        .args(["30"])
        .auto_start(true)
        .start_secs(0.2)
        .backoff_secs(0.1)
        .stop_timeout_secs(2.0)
        .build()
        .unwrap()
}

/// Shell snippet run with `/bin/sh -c`
pub fn shell(name: &str, script: &str) -> ProgramSpec {
    ProgramSpec::builder(name, "/bin/sh")
        .args(["-c", script])
        .start_secs(0.5)
        .backoff_secs(0.1)
        .stop_timeout_secs(1.0)
        .build()
        .unwrap()
}

/// Poll the program state until it matches, or panic after the timeout
pub async fn wait_for_state(supervisor: &Supervisor, name: &str, expected: ProcessState) {
    let deadline = Instant::now() + DEFAULT_TIMEOUT;
    loop {
        let state = supervisor.program_state(name).unwrap();
        if state == expected {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "{name} stuck in {state}, expected {expected}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Collect bus messages until `count` arrived or the timeout passed
pub async fn collect_events(events: &mut Subscription, count: usize) -> Vec<String> {
    let mut messages = Vec::new();
    let deadline = tokio::time::Instant::now() + DEFAULT_TIMEOUT;
    while messages.len() < count {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Some(message)) => messages.push(message),
            _ => break,
        }
    }
    messages
}

/// True while a process with this pid exists
pub fn pid_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

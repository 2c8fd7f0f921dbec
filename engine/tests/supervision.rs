//! End-to-end supervision scenarios against real processes

mod common;

use common::*;
use std::time::Duration;
use suv_engine::domain::ports::ProgramStore;
use suv_engine::infrastructure::YamlProgramStore;
use suv_engine::{DomainError, ProcessState, UpdateOutcome};

#[tokio::test(flavor = "multi_thread")]
async fn test_web_program_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = supervisor(dir.path());
    let mut events = supervisor.subscribe();

    let outcome = supervisor.add_or_update(sleeper("web")).await.unwrap();
    assert_eq!(outcome, UpdateOutcome::Added);
    wait_for_state(&supervisor, "web", ProcessState::Running).await;

    let status = supervisor.program_status("web").await.unwrap();
    let pid = status.pid.unwrap();
    assert!(pid_alive(pid));
    assert_eq!(status.retry_count, 0);

    let state = supervisor.stop_program("web").await.unwrap();
    assert_eq!(state, ProcessState::Stopping);
    wait_for_state(&supervisor, "web", ProcessState::Stopped).await;
    let status = supervisor.program_status("web").await.unwrap();
    assert_eq!(status.exit_code, Some(143));
    assert_eq!(status.pid, None);

    let messages = collect_events(&mut events, 5).await;
    assert_eq!(
        messages,
        vec![
            "web state: stopped -> starting",
            "web add or update",
            "web state: starting -> running",
            "web state: running -> stopping",
            "web state: stopping -> stopped",
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_crashing_program_reaches_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = supervisor(dir.path());

    let mut spec = shell("web", "exit 1");
    spec.max_retries = 2;
    supervisor.add_or_update(spec).await.unwrap();
    supervisor.start_program("web").await.unwrap();

    wait_for_state(&supervisor, "web", ProcessState::Fatal).await;
    let status = supervisor.program_status("web").await.unwrap();
    assert_eq!(status.retry_count, 2);
    assert_eq!(status.exit_code, Some(1));

    // Stays fatal without intervention.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(supervisor.program_state("web").unwrap(), ProcessState::Fatal);

    let state = supervisor.start_program("web").await.unwrap();
    assert_eq!(state, ProcessState::Starting);
    assert_eq!(
        supervisor.program_status("web").await.unwrap().retry_count,
        0
    );
    supervisor.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_executable_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = supervisor(dir.path());

    let mut spec = shell("ghost", "");
    spec.command = "/nonexistent/binary".to_string();
    spec.max_retries = 1;
    supervisor.add_or_update(spec).await.unwrap();
    supervisor.start_program("ghost").await.unwrap();

    wait_for_state(&supervisor, "ghost", ProcessState::Fatal).await;
    let status = supervisor.program_status("ghost").await.unwrap();
    assert_eq!(status.exit_code, Some(-1));
    assert_eq!(status.retry_count, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_sigterm_ignoring_program_is_killed() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = supervisor(dir.path());

    let spec = shell("stubborn", "trap '' TERM; exec /bin/sleep 30");
    supervisor.add_or_update(spec).await.unwrap();
    supervisor.start_program("stubborn").await.unwrap();
    wait_for_state(&supervisor, "stubborn", ProcessState::Running).await;
    let pid = supervisor.program_status("stubborn").await.unwrap().pid.unwrap();

    supervisor.stop_program("stubborn").await.unwrap();
    wait_for_state(&supervisor, "stubborn", ProcessState::Stopped).await;

    let status = supervisor.program_status("stubborn").await.unwrap();
    assert_eq!(status.exit_code, Some(137));
    assert!(!pid_alive(pid));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_replace_in_place_restarts_with_new_spec() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = supervisor(dir.path());

    supervisor.add_or_update(sleeper("web")).await.unwrap();
    wait_for_state(&supervisor, "web", ProcessState::Running).await;
    let old_pid = supervisor.program_status("web").await.unwrap().pid.unwrap();

    let mut changed = sleeper("web");
    changed.args = vec!["60".to_string()];
    let outcome = supervisor.add_or_update(changed.clone()).await.unwrap();
    assert_eq!(outcome, UpdateOutcome::Replaced);
    supervisor.wait_idle().await;

    let status = supervisor.program_status("web").await.unwrap();
    assert_eq!(status.spec, changed);
    assert!(status.state.is_running());
    let new_pid = status.pid.unwrap();
    assert_ne!(new_pid, old_pid);
    assert!(!pid_alive(old_pid));
    assert!(pid_alive(new_pid));

    supervisor.shutdown().await;
    assert!(!pid_alive(new_pid));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_reconcile_and_persist() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = supervisor(dir.path());

    supervisor
        .reconcile(vec![sleeper("a"), sleeper("b")])
        .await
        .unwrap();
    wait_for_state(&supervisor, "b", ProcessState::Running).await;
    let a_pid = supervisor.program_status("a").await.unwrap().pid;
    let b_pid = supervisor.program_status("b").await.unwrap().pid.unwrap();

    supervisor.reconcile(vec![sleeper("a")]).await.unwrap();
    assert_eq!(supervisor.program_names(), vec!["a".to_string()]);
    assert!(matches!(
        supervisor.program_state("b"),
        Err(DomainError::ProgramNotFound(_))
    ));
    assert!(!pid_alive(b_pid));
    assert_eq!(supervisor.program_status("a").await.unwrap().pid, a_pid);

    let stored = YamlProgramStore::in_dir(dir.path()).load().await.unwrap();
    assert_eq!(stored, vec![sleeper("a")]);

    supervisor.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_reload_picks_up_file_changes() {
    let dir = tempfile::tempdir().unwrap();
    let store = YamlProgramStore::in_dir(dir.path());
    store.save(&[sleeper("a")]).await.unwrap();

    let supervisor = supervisor(dir.path());
    supervisor.load().await.unwrap();
    wait_for_state(&supervisor, "a", ProcessState::Running).await;

    store.save(&[sleeper("b")]).await.unwrap();
    supervisor.reload().await.unwrap();
    assert_eq!(supervisor.program_names(), vec!["b".to_string()]);
    wait_for_state(&supervisor, "b", ProcessState::Running).await;

    supervisor.shutdown().await;
    assert_eq!(supervisor.program_state("b").unwrap(), ProcessState::Stopped);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_stops_all_programs() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = supervisor(dir.path());
    supervisor
        .reconcile(vec![
            sleeper("a"),
            sleeper("b"),
            shell("stubborn", "trap '' TERM; exec /bin/sleep 30"),
        ])
        .await
        .unwrap();
    supervisor.start_program("stubborn").await.unwrap();
    wait_for_state(&supervisor, "a", ProcessState::Running).await;
    wait_for_state(&supervisor, "b", ProcessState::Running).await;

    let pids: Vec<u32> = supervisor
        .list_programs()
        .await
        .into_iter()
        .filter_map(|status| status.pid)
        .collect();
    assert_eq!(pids.len(), 3);

    supervisor.shutdown().await;
    for status in supervisor.list_programs().await {
        assert_eq!(status.state, ProcessState::Stopped, "{}", status.spec.name);
    }
    for pid in pids {
        assert!(!pid_alive(pid));
    }
}

//! Lifecycle tests against real short-lived OS processes (`/bin/sh` stands
//! in for the worker binary).

use std::path::PathBuf;
use std::time::Duration;

use common::Directive;
use supervisor::{ProcessSupervisor, SupervisorConfig};

fn shell_supervisor(script: &str, settle_ms: u64, grace_ms: u64) -> (ProcessSupervisor, PathBuf) {
    let dir = std::env::temp_dir().join(format!("fleetd-supervisor-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    let cfg = SupervisorConfig {
        worker_bin: "/bin/sh".into(),
        worker_args: vec!["-c".into(), script.into()],
        logs_dir: dir.join("logs"),
        spawn_settle: Duration::from_millis(settle_ms),
        terminate_grace: Duration::from_millis(grace_ms),
    };
    (ProcessSupervisor::new(cfg), dir)
}

#[tokio::test]
async fn spawn_failure_never_registers_a_handle() {
    let dir = std::env::temp_dir().join(format!("fleetd-supervisor-{}", uuid::Uuid::new_v4()));
    let cfg = SupervisorConfig {
        worker_bin: "/nonexistent/fleetd-worker".into(),
        worker_args: vec![],
        logs_dir: dir.join("logs"),
        spawn_settle: Duration::from_millis(10),
        terminate_grace: Duration::from_millis(100),
    };
    let sup = ProcessSupervisor::new(cfg);

    let result = sup.spawn("s1", &dir.join("s1.toml")).await;
    assert!(result.is_err());
    assert_eq!(sup.running_count().await, 0);
}

#[tokio::test]
async fn immediate_exit_is_a_spawn_failure() {
    let (sup, dir) = shell_supervisor("exit 3", 200, 500);

    let result = sup.spawn("s1", &dir.join("s1.toml")).await;
    assert!(result.is_err(), "worker that dies during settle must not register");
    assert_eq!(sup.running_count().await, 0);
}

#[tokio::test]
async fn second_spawn_for_same_name_conflicts() {
    let (sup, dir) = shell_supervisor("sleep 30", 50, 500);

    sup.spawn("s1", &dir.join("s1.toml")).await.unwrap();
    assert!(sup.spawn("s1", &dir.join("s1.toml")).await.is_err());
    assert_eq!(sup.running_count().await, 1);

    sup.terminate("s1").await.unwrap();
}

#[tokio::test]
async fn graceful_terminate_on_stop_directive() {
    // `read line` exits as soon as the stop directive arrives on stdin.
    let (sup, dir) = shell_supervisor("read line", 50, 2000);

    sup.spawn("s1", &dir.join("s1.toml")).await.unwrap();
    let forced = sup.terminate("s1").await.unwrap();

    assert!(!forced, "worker reading stdin should exit voluntarily");
    assert!(!sup.is_running("s1").await);
}

#[tokio::test]
async fn terminate_escalates_to_force_kill() {
    // This worker ignores its stdin entirely.
    let (sup, dir) = shell_supervisor("sleep 30", 50, 300);

    sup.spawn("s1", &dir.join("s1.toml")).await.unwrap();
    let forced = sup.terminate("s1").await.unwrap();

    assert!(forced, "worker ignoring the grace period must be killed");
    assert!(!sup.is_running("s1").await);
}

#[tokio::test]
async fn terminate_of_untracked_name_is_success() {
    let (sup, _dir) = shell_supervisor("sleep 30", 50, 300);
    assert_eq!(sup.terminate("ghost").await.unwrap(), false);
}

#[tokio::test]
async fn poll_all_reports_exited_workers_once() {
    let (sup, dir) = shell_supervisor("sleep 0.3", 50, 500);

    sup.spawn("s1", &dir.join("s1.toml")).await.unwrap();
    assert!(sup.poll_all().await.is_empty(), "worker still alive");

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(sup.poll_all().await, vec!["s1".to_string()]);

    // Handle is dropped on first detection.
    assert!(sup.poll_all().await.is_empty());
    assert_eq!(sup.running_count().await, 0);
}

#[tokio::test]
async fn directive_requires_a_live_worker() {
    let (sup, dir) = shell_supervisor("read a; read b; read c", 50, 2000);

    assert!(sup.send_directive("s1", Directive::Pause).await.is_err());

    sup.spawn("s1", &dir.join("s1.toml")).await.unwrap();
    sup.send_directive("s1", Directive::Pause).await.unwrap();
    sup.send_directive("s1", Directive::Resume).await.unwrap();

    sup.terminate("s1").await.unwrap();
}

#[tokio::test]
async fn terminate_all_clears_every_handle() {
    let (sup, dir) = shell_supervisor("read line", 50, 2000);

    sup.spawn("a", &dir.join("a.toml")).await.unwrap();
    sup.spawn("b", &dir.join("b.toml")).await.unwrap();
    assert_eq!(sup.running_count().await, 2);

    let mut names = sup.terminate_all(Duration::from_secs(5)).await;
    names.sort();
    assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(sup.running_count().await, 0);
}

#[tokio::test]
async fn terminate_all_kills_and_reaps_workers_that_ignore_the_grace() {
    // Workers ignoring stdin, grace far longer than the shutdown budget.
    let (sup, dir) = shell_supervisor("sleep 30", 50, 10_000);

    sup.spawn("a", &dir.join("a.toml")).await.unwrap();
    sup.spawn("b", &dir.join("b.toml")).await.unwrap();

    let started = std::time::Instant::now();
    let names = sup.terminate_all(Duration::from_millis(200)).await;

    assert_eq!(names.len(), 2);
    assert_eq!(sup.running_count().await, 0);
    // Clamped grace plus the kill-reap bound, never the full grace period.
    assert!(started.elapsed() < Duration::from_secs(3));
}

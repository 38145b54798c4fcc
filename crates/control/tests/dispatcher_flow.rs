//! End-to-end command flows through the dispatcher against a real registry
//! directory and real `/bin/sh` worker processes.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::RwLock;

use common::command::CreateStrategy;
use common::{Command, InboundCommand, StrategyStatus};
use control::{Dispatcher, DispatcherConfig, Monitor};
use registry::StrategyRegistry;
use supervisor::{ProcessSupervisor, SupervisorConfig};

struct Harness {
    dispatcher: Dispatcher,
    registry: Arc<RwLock<StrategyRegistry>>,
    supervisor: Arc<ProcessSupervisor>,
    strategies_dir: PathBuf,
}

fn harness_with_worker(worker_bin: &str, worker_args: Vec<String>) -> Harness {
    let root = std::env::temp_dir().join(format!("fleetd-control-{}", uuid::Uuid::new_v4()));
    let strategies_dir = root.join("strategies");
    let logs_dir = root.join("logs");
    std::fs::create_dir_all(&strategies_dir).unwrap();

    let registry = Arc::new(RwLock::new(StrategyRegistry::new(&strategies_dir)));
    let supervisor = Arc::new(ProcessSupervisor::new(SupervisorConfig {
        worker_bin: worker_bin.into(),
        worker_args,
        logs_dir: logs_dir.clone(),
        spawn_settle: Duration::from_millis(50),
        terminate_grace: Duration::from_secs(2),
    }));
    let dispatcher = Dispatcher::new(
        registry.clone(),
        supervisor.clone(),
        DispatcherConfig {
            logs_dir,
            restart_pause: Duration::from_millis(50),
            restart_timeout: Duration::from_secs(5),
        },
    );

    Harness { dispatcher, registry, supervisor, strategies_dir }
}

fn shell_harness(script: &str) -> Harness {
    harness_with_worker("/bin/sh", vec!["-c".into(), script.into()])
}

fn create_cmd(name: &str) -> Command {
    Command::CreateStrategy(CreateStrategy {
        name: name.into(),
        strategy_type: "pure_market_making".into(),
        exchange: "binance".into(),
        trading_pair: "BTC-USDT".into(),
        config: json!({ "bid_spread": 0.001 }),
    })
}

async fn status_of(h: &Harness, name: &str) -> StrategyStatus {
    h.registry.read().await.get(name).unwrap().status
}

#[tokio::test]
async fn duplicate_create_is_a_conflict() {
    let h = shell_harness("sleep 30");

    let first = h.dispatcher.execute(create_cmd("s1")).await;
    assert!(first.success);
    assert_eq!(h.registry.read().await.len(), 1);

    let second = h.dispatcher.execute(create_cmd("s1")).await;
    assert!(!second.success);
    assert!(second.error.unwrap().contains("conflict"));
    assert_eq!(h.registry.read().await.len(), 1);
}

#[tokio::test]
async fn start_is_not_idempotent_while_running() {
    let h = shell_harness("sleep 30");
    h.dispatcher.execute(create_cmd("s1")).await;

    let started = h.dispatcher.execute(Command::StartStrategy { name: "s1".into() }).await;
    assert!(started.success);
    assert_eq!(status_of(&h, "s1").await, StrategyStatus::Running);

    let again = h.dispatcher.execute(Command::StartStrategy { name: "s1".into() }).await;
    assert!(!again.success);
    assert!(again.error.unwrap().contains("already running"));
    assert_eq!(h.supervisor.running_count().await, 1);

    h.dispatcher.execute(Command::StopStrategy { name: "s1".into() }).await;
}

#[tokio::test]
async fn spawn_failure_leaves_state_unchanged() {
    let h = harness_with_worker("/nonexistent/fleetd-worker", vec![]);
    h.dispatcher.execute(create_cmd("s1")).await;

    let response = h.dispatcher.execute(Command::StartStrategy { name: "s1".into() }).await;
    assert!(!response.success);
    assert_eq!(status_of(&h, "s1").await, StrategyStatus::Stopped);
    assert_eq!(h.supervisor.running_count().await, 0);
}

#[tokio::test]
async fn delete_running_strategy_stops_it_first() {
    let h = shell_harness("read line");
    h.dispatcher.execute(create_cmd("s1")).await;
    h.dispatcher.execute(Command::StartStrategy { name: "s1".into() }).await;
    assert_eq!(h.supervisor.running_count().await, 1);

    let deleted = h.dispatcher.execute(Command::DeleteStrategy { name: "s1".into() }).await;
    assert!(deleted.success);
    assert_eq!(h.supervisor.running_count().await, 0);
    assert!(!h.strategies_dir.join("s1.toml").exists());

    let status = h.dispatcher.execute(Command::GetStrategyStatus { name: "s1".into() }).await;
    assert!(!status.success);
    assert!(status.error.unwrap().contains("not found"));
}

#[tokio::test]
async fn pause_and_resume_enforce_the_state_machine() {
    let h = shell_harness("read a; read b; read c");
    h.dispatcher.execute(create_cmd("s1")).await;

    // Pausing a stopped strategy is rejected.
    let paused = h.dispatcher.execute(Command::PauseStrategy { name: "s1".into() }).await;
    assert!(!paused.success);
    assert!(paused.error.unwrap().contains("not running"));

    h.dispatcher.execute(Command::StartStrategy { name: "s1".into() }).await;

    // Resuming a running (non-paused) strategy is rejected.
    let resumed = h.dispatcher.execute(Command::ResumeStrategy { name: "s1".into() }).await;
    assert!(!resumed.success);
    assert!(resumed.error.unwrap().contains("not paused"));

    let paused = h.dispatcher.execute(Command::PauseStrategy { name: "s1".into() }).await;
    assert!(paused.success);
    assert_eq!(status_of(&h, "s1").await, StrategyStatus::Paused);

    let resumed = h.dispatcher.execute(Command::ResumeStrategy { name: "s1".into() }).await;
    assert!(resumed.success);
    assert_eq!(status_of(&h, "s1").await, StrategyStatus::Running);

    h.dispatcher.execute(Command::StopStrategy { name: "s1".into() }).await;
}

#[tokio::test]
async fn config_edits_are_blocked_while_running() {
    let h = shell_harness("sleep 30");
    h.dispatcher.execute(create_cmd("s1")).await;
    h.dispatcher.execute(Command::StartStrategy { name: "s1".into() }).await;

    let update = h
        .dispatcher
        .execute(Command::UpdateStrategyConfig {
            name: "s1".into(),
            config: json!({ "ask_spread": 0.002 }),
        })
        .await;
    assert!(!update.success);
    assert!(update.error.unwrap().contains("conflict"));

    h.dispatcher.execute(Command::StopStrategy { name: "s1".into() }).await;

    let update = h
        .dispatcher
        .execute(Command::UpdateStrategyConfig {
            name: "s1".into(),
            config: json!({ "ask_spread": 0.002 }),
        })
        .await;
    assert!(update.success);

    let reg = h.registry.read().await;
    let config = &reg.get("s1").unwrap().config;
    assert_eq!(config["bid_spread"], json!(0.001), "untouched key preserved");
    assert_eq!(config["ask_spread"], json!(0.002));
}

#[tokio::test]
async fn get_logs_distinguishes_unknown_from_empty() {
    let h = shell_harness("sleep 30");

    let unknown = h
        .dispatcher
        .execute(Command::GetLogs { name: Some("ghost".into()), lines: 10 })
        .await;
    assert!(!unknown.success);
    assert!(unknown.error.unwrap().contains("not found"));

    h.dispatcher.execute(create_cmd("s1")).await;
    let empty = h
        .dispatcher
        .execute(Command::GetLogs { name: Some("s1".into()), lines: 10 })
        .await;
    assert!(empty.success);
    assert_eq!(empty.data["logs"], json!([]));
}

#[tokio::test]
async fn crashed_worker_is_flagged_by_the_next_sweep() {
    let h = shell_harness("sleep 0.3");
    h.dispatcher.execute(create_cmd("s1")).await;
    h.dispatcher.execute(Command::StartStrategy { name: "s1".into() }).await;
    assert_eq!(status_of(&h, "s1").await, StrategyStatus::Running);

    tokio::time::sleep(Duration::from_millis(600)).await;

    let monitor = Monitor::new(h.registry.clone(), h.supervisor.clone());
    let outcome = monitor.sweep().await;

    assert_eq!(outcome.crashed.len(), 1);
    assert_eq!(outcome.crashed[0].strategy, "s1");
    assert_eq!(status_of(&h, "s1").await, StrategyStatus::Error);
    assert_eq!(h.supervisor.running_count().await, 0);
    assert_eq!(outcome.heartbeat.strategies_count, 1);
    assert_eq!(outcome.heartbeat.running_count, 0);
    assert_eq!(outcome.snapshot.strategies["s1"].status, StrategyStatus::Error);

    // A strategy in Error can be started again.
    let h2 = &h.dispatcher;
    let restarted = h2.execute(Command::StartStrategy { name: "s1".into() }).await;
    assert!(restarted.success);
    h2.execute(Command::StopStrategy { name: "s1".into() }).await;
}

#[tokio::test]
async fn restart_stops_the_whole_fleet() {
    let h = shell_harness("read line");
    h.dispatcher.execute(create_cmd("a")).await;
    h.dispatcher.execute(create_cmd("b")).await;
    h.dispatcher.execute(Command::StartStrategy { name: "a".into() }).await;
    h.dispatcher.execute(Command::StartStrategy { name: "b".into() }).await;
    assert_eq!(h.supervisor.running_count().await, 2);

    let response = h.dispatcher.execute(Command::RestartHummingbot).await;
    assert!(response.success);
    assert_eq!(h.supervisor.running_count().await, 0);
    assert_eq!(status_of(&h, "a").await, StrategyStatus::Stopped);
    assert_eq!(status_of(&h, "b").await, StrategyStatus::Stopped);
}

#[tokio::test]
async fn unknown_commands_get_no_response() {
    let h = shell_harness("sleep 30");

    let none = h
        .dispatcher
        .handle_inbound(InboundCommand { name: "explode".into(), payload: json!({}) })
        .await;
    assert!(none.is_none());

    // A known command with a bad payload still gets an error response.
    let some = h
        .dispatcher
        .handle_inbound(InboundCommand { name: "start_strategy".into(), payload: json!({}) })
        .await
        .unwrap();
    assert!(!some.success);
    assert!(some.error.unwrap().contains("validation"));
}

#[tokio::test]
async fn responses_echo_the_request_id() {
    let h = shell_harness("sleep 30");
    let id = uuid::Uuid::new_v4();

    let response = h
        .dispatcher
        .handle_inbound(InboundCommand {
            name: "get_strategies".into(),
            payload: json!({ "request_id": id.to_string() }),
        })
        .await
        .unwrap();

    assert!(response.success);
    assert_eq!(response.request_id, Some(id));
    assert_eq!(response.data["total"], json!(0));
}

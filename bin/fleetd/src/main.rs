use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

use broker::BrokerClient;
use common::{Config, StrategyStatus};
use control::{dispatcher::ORCHESTRATOR_LOG, Dispatcher, DispatcherConfig, Monitor};
use registry::StrategyRegistry;
use supervisor::{ProcessSupervisor, SupervisorConfig};

#[tokio::main]
async fn main() {
    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env();
    std::fs::create_dir_all(&cfg.strategies_dir)
        .unwrap_or_else(|e| panic!("Failed to create strategies dir: {e}"));
    std::fs::create_dir_all(&cfg.logs_dir)
        .unwrap_or_else(|e| panic!("Failed to create logs dir: {e}"));

    // ── Logging (stdout + fleetd.log, served by get_logs) ─────────────────────
    let file_appender = tracing_appender::rolling::never(&cfg.logs_dir, ORCHESTRATOR_LOG);
    let (file_writer, _log_guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .with_writer(file_writer.and(std::io::stdout))
        .with_ansi(false)
        .init();
    info!(broker = %format!("{}:{}", cfg.mqtt_host, cfg.mqtt_port), "fleetd starting");

    // ── Registry (startup scan of the strategies directory) ───────────────────
    let registry = StrategyRegistry::load(&cfg.strategies_dir)
        .unwrap_or_else(|e| panic!("Failed to load strategies from {:?}: {e}", cfg.strategies_dir));
    info!(strategies = registry.len(), "Registry loaded");
    let registry = Arc::new(RwLock::new(registry));

    // ── Process supervisor ────────────────────────────────────────────────────
    let supervisor = Arc::new(ProcessSupervisor::new(SupervisorConfig::from_config(&cfg)));

    // ── Broker connection ─────────────────────────────────────────────────────
    let (broker_client, broker_handle, command_rx) = BrokerClient::new(&cfg);

    // ── Dispatcher & monitor ──────────────────────────────────────────────────
    let dispatcher = Dispatcher::new(
        registry.clone(),
        supervisor.clone(),
        DispatcherConfig {
            logs_dir: cfg.logs_dir.clone(),
            restart_pause: std::time::Duration::from_secs(5),
            restart_timeout: cfg.shutdown_timeout,
        },
    );
    let monitor = Monitor::new(registry.clone(), supervisor.clone());

    // ── Spawn all tasks ───────────────────────────────────────────────────────
    tokio::spawn(broker_client.run());
    tokio::spawn(dispatcher.run(command_rx, broker_handle.clone()));
    tokio::spawn(monitor.run(broker_handle, cfg.monitor_interval));

    info!("All subsystems started. Waiting for shutdown signal.");
    tokio::signal::ctrl_c().await.expect("failed to listen for ctrl-c");

    // ── Shutdown: bounded-time stop of every live worker ──────────────────────
    info!("Shutdown signal received. Stopping workers.");
    let stopped = supervisor.terminate_all(cfg.shutdown_timeout).await;
    let mut reg = registry.write().await;
    for name in &stopped {
        let _ = reg.set_status(name, StrategyStatus::Stopped);
    }
    info!(stopped = stopped.len(), "fleetd exiting");
}

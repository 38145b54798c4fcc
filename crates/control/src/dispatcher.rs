//! Maps inbound commands to handlers and enforces the strategy state
//! machine.
//!
//! The dispatch loop processes commands strictly one at a time, so every
//! registry mutation and every same-name command sequence is serialized
//! here rather than with per-entry locks.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};

use broker::BrokerHandle;
use common::command::CreateStrategy;
use common::{topics, Command, Error, InboundCommand, Response, Result, StrategyStatus};
use registry::{PerformanceView, StrategyRegistry};
use supervisor::ProcessSupervisor;

/// Log file consulted by `get_logs` when no strategy name is given.
pub const ORCHESTRATOR_LOG: &str = "fleetd.log";

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub logs_dir: PathBuf,
    /// Pause between stopping all workers and reporting a restart complete.
    pub restart_pause: Duration,
    /// Bound on stopping the whole fleet during a restart.
    pub restart_timeout: Duration,
}

pub struct Dispatcher {
    registry: Arc<RwLock<StrategyRegistry>>,
    supervisor: Arc<ProcessSupervisor>,
    cfg: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<RwLock<StrategyRegistry>>,
        supervisor: Arc<ProcessSupervisor>,
        cfg: DispatcherConfig,
    ) -> Self {
        Self { registry, supervisor, cfg }
    }

    /// Receive, parse, execute, respond. Consumed by `tokio::spawn`.
    pub async fn run(self, mut command_rx: mpsc::Receiver<InboundCommand>, broker: BrokerHandle) {
        info!("Dispatcher running");
        while let Some(inbound) = command_rx.recv().await {
            let command_name = inbound.name.clone();
            if let Some(response) = self.handle_inbound(inbound).await {
                broker.publish_json(&topics::status(&command_name), &response);
            }
        }
        warn!("Command channel closed, dispatcher stopping");
    }

    /// Parse and execute one inbound message. Returns `None` for unknown
    /// command names: there is no reply topic anyone listens on, so they
    /// are logged and dropped.
    pub async fn handle_inbound(&self, inbound: InboundCommand) -> Option<Response> {
        let request_id = inbound.request_id();
        match Command::parse(&inbound.name, &inbound.payload) {
            Ok(command) => Some(self.execute(command).await.correlated(request_id)),
            Err(Error::Other(msg)) => {
                warn!(command = %inbound.name, "{msg}");
                None
            }
            Err(e) => {
                warn!(command = %inbound.name, error = %e, "Rejected command payload");
                Some(Response::err(&e).correlated(request_id))
            }
        }
    }

    /// Execute one command. Every failure is converted to a
    /// `{success: false, error}` response; nothing propagates past this
    /// boundary.
    pub async fn execute(&self, command: Command) -> Response {
        let name = command.name();
        match self.dispatch(command).await {
            Ok(response) => response,
            Err(e) => {
                if e.is_client_fault() {
                    info!(command = %name, error = %e, "Command rejected");
                } else {
                    warn!(command = %name, error = %e, "Command failed");
                }
                Response::err(&e)
            }
        }
    }

    async fn dispatch(&self, command: Command) -> Result<Response> {
        match command {
            Command::CreateStrategy(fields) => self.create_strategy(fields).await,
            Command::StartStrategy { name } => self.start_strategy(&name).await,
            Command::StopStrategy { name } => self.stop_strategy(&name).await,
            Command::PauseStrategy { name } => self.pause_strategy(&name).await,
            Command::ResumeStrategy { name } => self.resume_strategy(&name).await,
            Command::DeleteStrategy { name } => self.delete_strategy(&name).await,
            Command::UpdateStrategyConfig { name, config } => {
                self.update_strategy_config(&name, &config).await
            }
            Command::GetStrategies => self.get_strategies().await,
            Command::GetStrategyStatus { name } => self.get_strategy_status(&name).await,
            Command::GetPerformance { name } => self.get_performance(name.as_deref()).await,
            Command::GetLogs { name, lines } => self.get_logs(name.as_deref(), lines).await,
            Command::RestartHummingbot => self.restart_all().await,
        }
    }

    // ── Lifecycle handlers ───────────────────────────────────────────────

    async fn create_strategy(&self, fields: CreateStrategy) -> Result<Response> {
        let mut reg = self.registry.write().await;
        let strategy = reg.create(fields)?;
        Ok(Response::ok(format!("strategy '{}' created", strategy.name))
            .with("strategy", strategy))
    }

    async fn start_strategy(&self, name: &str) -> Result<Response> {
        let config_path = {
            let reg = self.registry.read().await;
            let strategy = reg.get(name).ok_or_else(|| Error::NotFound(name.to_string()))?;
            match strategy.status {
                StrategyStatus::Stopped | StrategyStatus::Error => {}
                StrategyStatus::Running => {
                    return Err(Error::Conflict(format!("strategy '{name}' is already running")))
                }
                StrategyStatus::Paused => {
                    return Err(Error::Conflict(format!(
                        "strategy '{name}' is paused; resume it instead"
                    )))
                }
            }
            reg.config_path(name)
        };

        // Spawn failure leaves the status untouched.
        self.supervisor.spawn(name, &config_path).await?;

        let mut reg = self.registry.write().await;
        if let Some(strategy) = reg.get_mut(name) {
            strategy.status = StrategyStatus::Running;
            strategy.performance.start_time = Some(Utc::now());
            strategy.performance.end_time = None;
            strategy.touch();
        }
        info!(name = %name, "Strategy started");
        Ok(Response::ok(format!("strategy '{name}' started")))
    }

    async fn stop_strategy(&self, name: &str) -> Result<Response> {
        {
            let reg = self.registry.read().await;
            let strategy = reg.get(name).ok_or_else(|| Error::NotFound(name.to_string()))?;
            if strategy.status == StrategyStatus::Stopped {
                return Err(Error::Conflict(format!("strategy '{name}' is not running")));
            }
        }

        let forced = self.supervisor.terminate(name).await?;
        if forced {
            warn!(name = %name, "Worker did not exit within the grace period");
        }

        let mut reg = self.registry.write().await;
        if let Some(strategy) = reg.get_mut(name) {
            strategy.status = StrategyStatus::Stopped;
            strategy.performance.end_time = Some(Utc::now());
            strategy.touch();
        }
        info!(name = %name, "Strategy stopped");
        Ok(Response::ok(format!("strategy '{name}' stopped")))
    }

    async fn pause_strategy(&self, name: &str) -> Result<Response> {
        {
            let reg = self.registry.read().await;
            let strategy = reg.get(name).ok_or_else(|| Error::NotFound(name.to_string()))?;
            if strategy.status != StrategyStatus::Running {
                return Err(Error::Conflict(format!("strategy '{name}' is not running")));
            }
        }

        self.supervisor.send_directive(name, common::Directive::Pause).await?;
        self.registry.write().await.set_status(name, StrategyStatus::Paused)?;
        info!(name = %name, "Strategy paused");
        Ok(Response::ok(format!("strategy '{name}' paused")))
    }

    async fn resume_strategy(&self, name: &str) -> Result<Response> {
        {
            let reg = self.registry.read().await;
            let strategy = reg.get(name).ok_or_else(|| Error::NotFound(name.to_string()))?;
            if strategy.status != StrategyStatus::Paused {
                return Err(Error::Conflict(format!("strategy '{name}' is not paused")));
            }
        }

        self.supervisor.send_directive(name, common::Directive::Resume).await?;
        self.registry.write().await.set_status(name, StrategyStatus::Running)?;
        info!(name = %name, "Strategy resumed");
        Ok(Response::ok(format!("strategy '{name}' resumed")))
    }

    async fn delete_strategy(&self, name: &str) -> Result<Response> {
        let was_running = {
            let reg = self.registry.read().await;
            let strategy = reg.get(name).ok_or_else(|| Error::NotFound(name.to_string()))?;
            strategy.status == StrategyStatus::Running || strategy.status == StrategyStatus::Paused
        };

        if was_running {
            self.supervisor.terminate(name).await?;
        }

        self.registry.write().await.remove(name)?;
        Ok(Response::ok(format!("strategy '{name}' deleted")))
    }

    async fn update_strategy_config(
        &self,
        name: &str,
        config: &serde_json::Value,
    ) -> Result<Response> {
        let mut reg = self.registry.write().await;
        let strategy = reg.get(name).ok_or_else(|| Error::NotFound(name.to_string()))?;
        if strategy.status == StrategyStatus::Running {
            return Err(Error::Conflict(format!(
                "cannot edit config of '{name}' while it is running"
            )));
        }

        let strategy = reg.update_config(name, config)?;
        Ok(Response::ok(format!("config of '{name}' updated")).with("strategy", strategy))
    }

    // ── Read-only handlers ───────────────────────────────────────────────

    async fn get_strategies(&self) -> Result<Response> {
        let reg = self.registry.read().await;
        let strategies = reg.list();
        Ok(Response::success()
            .with("total", strategies.len())
            .with("strategies", &strategies))
    }

    async fn get_strategy_status(&self, name: &str) -> Result<Response> {
        let reg = self.registry.read().await;
        let strategy = reg.get(name).ok_or_else(|| Error::NotFound(name.to_string()))?;
        Ok(Response::success().with("strategy", strategy))
    }

    async fn get_performance(&self, name: Option<&str>) -> Result<Response> {
        let reg = self.registry.read().await;
        let now = Utc::now();
        match name {
            Some(name) => {
                let strategy =
                    reg.get(name).ok_or_else(|| Error::NotFound(name.to_string()))?;
                let view = PerformanceView::compute(&strategy.performance, now);
                Ok(Response::success().with("strategy", name).with("performance", view))
            }
            None => {
                let all: std::collections::BTreeMap<_, _> = reg
                    .list()
                    .into_iter()
                    .map(|s| (s.name.clone(), PerformanceView::compute(&s.performance, now)))
                    .collect();
                Ok(Response::success().with("performance", all))
            }
        }
    }

    async fn get_logs(&self, name: Option<&str>, lines: usize) -> Result<Response> {
        let (log_path, response) = match name {
            Some(name) => {
                if !self.registry.read().await.contains(name) {
                    return Err(Error::NotFound(name.to_string()));
                }
                (
                    self.cfg.logs_dir.join(format!("{name}.log")),
                    Response::success().with("strategy", name),
                )
            }
            None => (self.cfg.logs_dir.join(ORCHESTRATOR_LOG), Response::success()),
        };

        let logs = tail_file(&log_path, lines).await?;
        Ok(response.with("logs", logs))
    }

    // ── Fleet-wide restart ───────────────────────────────────────────────

    async fn restart_all(&self) -> Result<Response> {
        let stopped = self.supervisor.terminate_all(self.cfg.restart_timeout).await;

        let mut reg = self.registry.write().await;
        for name in &stopped {
            if let Some(strategy) = reg.get_mut(name) {
                strategy.status = StrategyStatus::Stopped;
                strategy.performance.end_time = Some(Utc::now());
                strategy.touch();
            }
        }
        drop(reg);

        tokio::time::sleep(self.cfg.restart_pause).await;
        info!(stopped = stopped.len(), "Fleet restart complete");
        Ok(Response::ok("restart complete").with("stopped", stopped))
    }
}

/// Last `lines` lines of a log file. A missing file is an empty tail, not
/// an error.
async fn tail_file(path: &std::path::Path, lines: usize) -> Result<Vec<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => {
            let all: Vec<&str> = content.lines().collect();
            let start = all.len().saturating_sub(lines);
            Ok(all[start..].iter().map(|s| s.to_string()).collect())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

//! Crash reconciliation and periodic broadcasts.
//!
//! On every cycle the monitor polls the supervisor for exited workers,
//! flips their registry status to Error, and publishes the error
//! notification, a full status snapshot, and a heartbeat. Publishes are
//! fire-and-forget so a slow broker never stalls the cycle.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use broker::BrokerHandle;
use common::{topics, ErrorLog, Heartbeat, StatusSnapshot, StrategyStatus, StrategySummary};
use registry::StrategyRegistry;
use supervisor::ProcessSupervisor;

pub struct Monitor {
    registry: Arc<RwLock<StrategyRegistry>>,
    supervisor: Arc<ProcessSupervisor>,
}

/// Everything one monitoring cycle decided to broadcast.
pub struct SweepOutcome {
    pub crashed: Vec<ErrorLog>,
    pub snapshot: StatusSnapshot,
    pub heartbeat: Heartbeat,
}

impl Monitor {
    pub fn new(
        registry: Arc<RwLock<StrategyRegistry>>,
        supervisor: Arc<ProcessSupervisor>,
    ) -> Self {
        Self { registry, supervisor }
    }

    /// One reconciliation pass: detect crashes, mark them, and assemble the
    /// broadcasts. Publishing is left to the caller so the pass itself is
    /// directly testable.
    pub async fn sweep(&self) -> SweepOutcome {
        let exited = self.supervisor.poll_all().await;
        let now = Utc::now();

        let mut reg = self.registry.write().await;
        let mut crashed = Vec::new();
        for name in exited {
            let Some(strategy) = reg.get_mut(&name) else { continue };
            // A worker the dispatcher stopped on purpose is already marked;
            // only live statuses count as crashes.
            if matches!(strategy.status, StrategyStatus::Running | StrategyStatus::Paused) {
                warn!(name = %name, "Marking crashed strategy");
                strategy.status = StrategyStatus::Error;
                strategy.performance.end_time = Some(now);
                strategy.touch();
                crashed.push(ErrorLog {
                    strategy: name,
                    message: "worker process exited unexpectedly".to_string(),
                    timestamp: now,
                });
            }
        }

        let strategies = reg
            .list()
            .into_iter()
            .map(|s| {
                (
                    s.name.clone(),
                    StrategySummary {
                        status: s.status,
                        last_updated: s.last_updated,
                        performance: s.performance.clone(),
                    },
                )
            })
            .collect();

        let heartbeat = Heartbeat {
            timestamp: now,
            status: "alive".to_string(),
            strategies_count: reg.len(),
            running_count: reg.count_with_status(StrategyStatus::Running),
        };

        SweepOutcome { crashed, snapshot: StatusSnapshot { timestamp: now, strategies }, heartbeat }
    }

    /// Run the monitoring loop. Consumed by `tokio::spawn`.
    pub async fn run(self, broker: BrokerHandle, interval: Duration) {
        info!(interval = ?interval, "Monitor running");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await; // first tick fires immediately

        loop {
            ticker.tick().await;
            let outcome = self.sweep().await;

            for error_log in &outcome.crashed {
                broker.publish_json(topics::ERROR_LOG, error_log);
            }
            broker.publish_json(topics::STATUS_UPDATE, &outcome.snapshot);
            broker.publish_json(topics::HEARTBEAT, &outcome.heartbeat);
        }
    }
}

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a managed strategy.
///
/// Transitions are enforced by the command dispatcher; nothing else writes
/// the status field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StrategyStatus {
    #[default]
    Stopped,
    Running,
    Paused,
    Error,
}

impl std::fmt::Display for StrategyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyStatus::Stopped => write!(f, "stopped"),
            StrategyStatus::Running => write!(f, "running"),
            StrategyStatus::Paused => write!(f, "paused"),
            StrategyStatus::Error => write!(f, "error"),
        }
    }
}

/// Raw performance counters of a strategy. Updated by lifecycle events
/// (start/stop timestamps) and by whatever fills trade counters externally.
/// Derived metrics live in the registry's performance view, never here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Performance {
    pub total_trades: u64,
    pub profitable_trades: u64,
    pub total_pnl: f64,
    pub win_rate: f64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

/// The unit of orchestration: a named worker configuration plus lifecycle
/// status plus performance counters. `name` doubles as the config file stem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    pub name: String,
    pub strategy_type: String,
    pub exchange: String,
    pub trading_pair: String,
    /// Opaque worker configuration, merged into the on-disk file. Always a
    /// JSON object; the orchestrator never interprets its keys.
    pub config: serde_json::Value,
    pub status: StrategyStatus,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub performance: Performance,
}

impl Strategy {
    pub fn new(
        name: impl Into<String>,
        strategy_type: impl Into<String>,
        exchange: impl Into<String>,
        trading_pair: impl Into<String>,
        config: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            strategy_type: strategy_type.into(),
            exchange: exchange.into(),
            trading_pair: trading_pair.into(),
            config,
            status: StrategyStatus::Stopped,
            created_at: now,
            last_updated: now,
            performance: Performance::default(),
        }
    }

    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }
}

/// In-band instruction written as one JSON line to a worker's stdin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Directive {
    Pause,
    Resume,
    Stop,
}

impl std::fmt::Display for Directive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Directive::Pause => write!(f, "pause"),
            Directive::Resume => write!(f, "resume"),
            Directive::Stop => write!(f, "stop"),
        }
    }
}

/// Periodic liveness broadcast on `control/status/heartbeat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub timestamp: DateTime<Utc>,
    pub status: String,
    pub strategies_count: usize,
    pub running_count: usize,
}

/// One strategy's slice of the periodic status snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategySummary {
    pub status: StrategyStatus,
    pub last_updated: DateTime<Utc>,
    pub performance: Performance,
}

/// Full fleet snapshot broadcast on `control/status/update`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub timestamp: DateTime<Utc>,
    pub strategies: BTreeMap<String, StrategySummary>,
}

/// Asynchronous error notification on `control/logs/error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorLog {
    pub strategy: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_strategy_starts_stopped_with_zeroed_counters() {
        let s = Strategy::new("s1", "mm", "binance", "BTC-USDT", serde_json::json!({}));
        assert_eq!(s.status, StrategyStatus::Stopped);
        assert_eq!(s.performance.total_trades, 0);
        assert!(s.performance.start_time.is_none());
        assert!(s.performance.end_time.is_none());
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&StrategyStatus::Error).unwrap();
        assert_eq!(json, "\"error\"");
    }
}

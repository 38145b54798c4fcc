use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use common::Performance;

/// Derived performance metrics computed on demand from a strategy's raw
/// counters. Read-only: computing a view never mutates the stored record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceView {
    pub total_trades: u64,
    pub profitable_trades: u64,
    pub total_pnl: f64,
    /// Profitable trades over total trades, as a percentage. 0 when no
    /// trades have happened.
    pub win_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Running duration in hours: end−start when both timestamps are set,
    /// now−start while the strategy is still running, absent otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_hours: Option<f64>,
}

impl PerformanceView {
    pub fn compute(perf: &Performance, now: DateTime<Utc>) -> Self {
        let duration_hours = match (perf.start_time, perf.end_time) {
            (Some(start), Some(end)) => Some(hours_between(start, end)),
            (Some(start), None) => Some(hours_between(start, now)),
            _ => None,
        };

        PerformanceView {
            total_trades: perf.total_trades,
            profitable_trades: perf.profitable_trades,
            total_pnl: perf.total_pnl,
            win_rate: win_rate(perf.profitable_trades, perf.total_trades),
            start_time: perf.start_time,
            end_time: perf.end_time,
            duration_hours,
        }
    }
}

pub fn win_rate(profitable_trades: u64, total_trades: u64) -> f64 {
    if total_trades == 0 {
        0.0
    } else {
        profitable_trades as f64 / total_trades as f64 * 100.0
    }
}

fn hours_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds() as f64 / 3_600_000.0
}

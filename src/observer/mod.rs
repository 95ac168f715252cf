//! Observer: ledger-derived health signals feeding the autonomy loop.
//!
//! Each tick the observer reads recent execution rows, aggregates error
//! counts, costs, success rate, and a latency trend, then scores the
//! bundle into a pain value the planner reacts to. Economy vitality is
//! folded in so starvation hurts even when executions look healthy.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use tracing::debug;

use crate::economy::Economy;
use crate::ledger::{ExecutionLedger, ExecutionRecord, ExecutionStatus, LedgerError};

/// How many recent rows one observation reads.
const OBSERVATION_WINDOW: u32 = 100;

/// Aggregated health signals plus the scored pain value.
#[derive(Debug, Clone, Serialize)]
pub struct SignalBundle {
    /// Failed executions in the last hour.
    pub errors_last_hour: u64,
    /// Mean cost per terminal execution in the window.
    pub avg_cost: f64,
    /// Fraction of terminal executions that completed.
    pub success_rate: f64,
    /// "up", "down", or "stable" across the window halves.
    pub latency_trend: String,
    /// Terminal autonomy-initiated executions in the last hour — the
    /// cooldown counter the decider consults.
    pub recent_actions: u64,
    /// Scored pain in `[0.0, 1.0]`.
    pub pain_score: f64,
    /// Overall direction, mirroring the latency trend.
    pub trend: String,
    /// How sure the scorer is that the pain is real.
    pub confidence: f64,
    /// Domains contributing pressure (e.g. "stability", "economy").
    pub pressure_sources: Vec<String>,
    /// Raw counters backing the aggregates.
    pub raw_metrics: serde_json::Value,
}

/// Collects signal bundles from the ledger and economy.
#[derive(Debug)]
pub struct Observer {
    ledger: Arc<dyn ExecutionLedger>,
    economy: Arc<Economy>,
}

impl Observer {
    /// Build an observer over the shared ledger and economy.
    pub fn new(ledger: Arc<dyn ExecutionLedger>, economy: Arc<Economy>) -> Self {
        Self { ledger, economy }
    }

    /// Aggregate recent executions into a scored signal bundle.
    ///
    /// # Errors
    ///
    /// Propagates ledger read failures.
    pub async fn collect_signals(&self) -> Result<SignalBundle, LedgerError> {
        let rows = self.ledger.list_recent(OBSERVATION_WINDOW).await?;
        let hour_ago = Utc::now() - ChronoDuration::hours(1);

        let terminal: Vec<&ExecutionRecord> =
            rows.iter().filter(|r| r.status.is_terminal()).collect();
        let completed = terminal
            .iter()
            .filter(|r| r.status == ExecutionStatus::Completed)
            .count();
        let errors_last_hour = terminal
            .iter()
            .filter(|r| r.status == ExecutionStatus::Failed && r.updated_at >= hour_ago)
            .count();
        let recent_actions = terminal
            .iter()
            .filter(|r| r.caller.as_deref() == Some("autonomy") && r.updated_at >= hour_ago)
            .count();

        let total_cost: f64 = terminal.iter().map(|r| r.cost_spent).sum();
        let avg_cost = if terminal.is_empty() {
            0.0
        } else {
            total_cost / usize_to_f64(terminal.len())
        };
        let success_rate = if terminal.is_empty() {
            1.0
        } else {
            usize_to_f64(completed) / usize_to_f64(terminal.len())
        };

        let latency_trend = latency_trend(&terminal);

        let (pressure, pressure_sources) = score_pressure(
            u64_from(errors_last_hour),
            avg_cost,
            success_rate,
            &latency_trend,
        );
        // Starvation pain counts even when execution metrics look fine.
        let vitality = self.economy.vitality();
        let pain_score = pressure.max(vitality);
        let confidence = if pain_score > 0.5 { 0.8 } else { 0.4 };

        let bundle = SignalBundle {
            errors_last_hour: u64_from(errors_last_hour),
            avg_cost,
            success_rate,
            latency_trend: latency_trend.clone(),
            recent_actions: u64_from(recent_actions),
            pain_score,
            trend: latency_trend,
            confidence,
            pressure_sources,
            raw_metrics: serde_json::json!({
                "window": rows.len(),
                "terminal": terminal.len(),
                "completed": completed,
                "economy_vitality": vitality,
            }),
        };
        debug!(
            pain = bundle.pain_score,
            errors = bundle.errors_last_hour,
            success_rate = bundle.success_rate,
            "signals collected"
        );
        Ok(bundle)
    }
}

/// Compare mean durations of the newer and older window halves.
fn latency_trend(terminal: &[&ExecutionRecord]) -> String {
    let durations: Vec<f64> = terminal
        .iter()
        .filter_map(|r| r.duration_ms)
        .map(|ms| ms_to_f64(ms))
        .collect();
    if durations.len() < 4 {
        return "stable".to_owned();
    }
    // list_recent is newest-first.
    let half = durations.len() / 2;
    let newer: f64 = durations[..half].iter().sum::<f64>() / usize_to_f64(half);
    let older: f64 =
        durations[half..].iter().sum::<f64>() / usize_to_f64(durations.len().saturating_sub(half));
    if newer > older * 1.5 {
        "up".to_owned()
    } else if older > newer * 1.5 {
        "down".to_owned()
    } else {
        "stable".to_owned()
    }
}

/// Heuristic pressure scoring: each unhealthy signal adds a fixed
/// contribution, clamped to 1.0.
fn score_pressure(
    errors_last_hour: u64,
    avg_cost: f64,
    success_rate: f64,
    latency_trend: &str,
) -> (f64, Vec<String>) {
    let mut pressure = 0.0;
    let mut sources = Vec::new();

    if errors_last_hour > 3 {
        pressure += 0.3;
        sources.push("stability".to_owned());
    }
    if avg_cost > 2.0 {
        pressure += 0.3;
        sources.push("economy".to_owned());
    }
    if latency_trend == "up" {
        pressure += 0.2;
        sources.push("performance".to_owned());
    }
    if success_rate < 0.8 {
        pressure += 0.3;
        sources.push("cognition".to_owned());
    }

    (f64::min(pressure, 1.0), sources)
}

fn usize_to_f64(n: usize) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    {
        n as f64
    }
}

fn u64_from(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

fn ms_to_f64(ms: i64) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    {
        ms as f64
    }
}

//! Internal economy: budget accounting, per-tool reputation, throttling,
//! and the vitality signal the autonomy loop treats as pain.
//!
//! One process-wide [`Economy`] guards a single mutable [`EconomyState`]
//! behind a mutex and rewrites its JSON file after every mutation. Debt is
//! allowed — there are no hard stops, only consequences (throttling, pain,
//! and the planner reacting to both).

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Persisted schema version; bumps invalidate older files.
const SCHEMA_VERSION: u32 = 1;

/// Tools exempt from the low-budget throttle — survival machinery must
/// keep running even when broke.
const ESSENTIAL_TOOLS: [&str; 2] = ["maintainer", "body"];

/// Performance and economic viability counters for one tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolStats {
    /// Total invocations that reached execution.
    pub calls: u64,
    /// Invocations that executed and failed.
    pub failures: u64,
    /// Budget debited across all calls.
    pub total_spent: f64,
    /// Value credited back by this tool.
    pub total_value: f64,
}

impl ToolStats {
    /// Fraction of calls that failed; `0.0` with no calls.
    pub fn error_rate(&self) -> f64 {
        if self.calls == 0 {
            return 0.0;
        }
        ratio(self.failures, self.calls)
    }

    /// Value returned per unit spent; `0.0` with no spend.
    pub fn roi(&self) -> f64 {
        if self.total_spent == 0.0 {
            return 0.0;
        }
        self.total_value / self.total_spent
    }
}

/// One entry in the bounded economy event ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EconomyEvent {
    /// Event discriminator: "spend" or "value".
    pub kind: String,
    /// Tool the event is attributed to, if any.
    #[serde(default)]
    pub tool: Option<String>,
    /// Cost debited (spend events).
    #[serde(default)]
    pub cost: Option<f64>,
    /// Whether the spend was for a failed execution.
    #[serde(default)]
    pub failed: Option<bool>,
    /// Raw value reported (value events).
    #[serde(default)]
    pub value: Option<f64>,
    /// Reporter confidence in the value.
    #[serde(default)]
    pub confidence: Option<f64>,
    /// Who reported the value.
    #[serde(default)]
    pub source: Option<String>,
    /// Value actually credited after confidence and decay.
    #[serde(default)]
    pub realized: Option<f64>,
    /// When the event happened.
    pub ts: DateTime<Utc>,
}

/// The single process-wide economy record, persisted as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EconomyState {
    /// Persisted schema version.
    pub schema_version: u32,
    /// Current budget; may go negative (debt).
    pub budget: f64,
    /// Headroom above budget that value accrual and regen may fill.
    pub reserve: f64,
    /// Budget regenerated per minute when positive.
    pub regen_rate: f64,
    /// Last time regen was applied.
    pub last_tick: DateTime<Utc>,
    /// Lifetime spend.
    pub total_spent: f64,
    /// Lifetime value recorded.
    pub total_value: f64,
    /// Per-tool counters keyed by tool name.
    pub tool_stats: BTreeMap<String, ToolStats>,
    /// Bounded ring of recent spend/value events.
    pub events: VecDeque<EconomyEvent>,
}

/// Startup values used when no state file exists yet.
#[derive(Debug, Clone)]
pub struct EconomyDefaults {
    /// Initial budget.
    pub budget: f64,
    /// Initial reserve.
    pub reserve: f64,
    /// Regen rate in budget per minute.
    pub regen_rate: f64,
    /// Maximum events retained in the ring.
    pub max_events: usize,
    /// Scaling factor applied to realized value.
    pub decay_factor: f64,
}

impl Default for EconomyDefaults {
    fn default() -> Self {
        Self {
            budget: 300.0,
            reserve: 100.0,
            regen_rate: 0.0,
            max_events: 500,
            decay_factor: 1.0,
        }
    }
}

/// Per-tool reputation summary derived from the stats counters.
#[derive(Debug, Clone, Serialize)]
pub struct ToolReputation {
    /// Tool name.
    pub tool: String,
    /// Total calls.
    pub calls: u64,
    /// Mean cost per call.
    pub avg_cost: f64,
    /// Mean value per call.
    pub avg_value: f64,
    /// Value per unit spent.
    pub roi: f64,
    /// "throttled" or "active".
    pub status: &'static str,
}

/// Budget accounting with disk-backed state.
pub struct Economy {
    state: Mutex<EconomyState>,
    path: PathBuf,
    max_events: usize,
    decay_factor: f64,
}

impl std::fmt::Debug for Economy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Economy").field("path", &self.path).finish()
    }
}

impl Economy {
    /// Load the economy from `path`, or start from `defaults` when the
    /// file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be parsed, or
    /// carries an unknown schema version.
    pub fn load(path: impl AsRef<Path>, defaults: EconomyDefaults) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = match std::fs::read_to_string(&path) {
            Ok(contents) => {
                let state: EconomyState =
                    serde_json::from_str(&contents).context("failed to parse economy state")?;
                if state.schema_version != SCHEMA_VERSION {
                    anyhow::bail!(
                        "unsupported economy schema version: {}",
                        state.schema_version
                    );
                }
                state
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => EconomyState {
                schema_version: SCHEMA_VERSION,
                budget: defaults.budget,
                reserve: defaults.reserve,
                regen_rate: defaults.regen_rate,
                last_tick: Utc::now(),
                total_spent: 0.0,
                total_value: 0.0,
                tool_stats: BTreeMap::new(),
                events: VecDeque::new(),
            },
            Err(e) => return Err(e).context("failed to read economy state"),
        };

        Ok(Self {
            state: Mutex::new(state),
            path,
            max_events: defaults.max_events,
            decay_factor: defaults.decay_factor,
        })
    }

    /// Advance the regen clock, crediting `elapsed_minutes × regen_rate`
    /// capped at `budget + reserve`. Idempotent across short gaps.
    pub fn tick(&self) {
        let mut state = self.lock();
        Self::tick_locked(&mut state);
        self.persist(&state);
    }

    fn tick_locked(state: &mut EconomyState) {
        let now = Utc::now();
        let elapsed_min = minutes_between(state.last_tick, now);
        if elapsed_min <= 0.0 {
            return;
        }
        if state.regen_rate > 0.0 {
            let regen = elapsed_min * state.regen_rate;
            let ceiling = state.budget + state.reserve;
            state.budget = (state.budget + regen).min(ceiling);
        }
        state.last_tick = now;
    }

    /// Debit `cost`, update the tool's counters, and record the event.
    ///
    /// Always permitted — debt is allowed; the consequences surface
    /// through throttling and the planner.
    pub fn spend(&self, cost: f64, tool_name: Option<&str>, failed: bool) {
        let mut state = self.lock();
        Self::tick_locked(&mut state);
        state.budget -= cost;
        state.total_spent += cost;

        if let Some(tool) = tool_name {
            let stats = state.tool_stats.entry(tool.to_owned()).or_default();
            stats.total_spent += cost;
            stats.calls = stats.calls.saturating_add(1);
            if failed {
                stats.failures = stats.failures.saturating_add(1);
            }
        }

        self.push_event(
            &mut state,
            EconomyEvent {
                kind: "spend".to_owned(),
                tool: tool_name.map(str::to_owned),
                cost: Some(cost),
                failed: Some(failed),
                value: None,
                confidence: None,
                source: None,
                realized: None,
                ts: Utc::now(),
            },
        );
        debug!(cost, tool = tool_name, failed, budget = state.budget, "economy spend");
        self.persist(&state);
    }

    /// Credit `value × confidence × decay` to the budget, capped at
    /// `budget + reserve`, and update the tool's value counter.
    pub fn record_value(
        &self,
        value: f64,
        confidence: f64,
        source: &str,
        tool_name: Option<&str>,
    ) {
        let mut state = self.lock();
        state.total_value += value;

        if let Some(tool) = tool_name {
            let stats = state.tool_stats.entry(tool.to_owned()).or_default();
            stats.total_value += value;
        }

        let realized = value * confidence * self.decay_factor;
        if realized > 0.0 {
            let ceiling = state.budget + state.reserve;
            state.budget = (state.budget + realized).min(ceiling);
        }

        self.push_event(
            &mut state,
            EconomyEvent {
                kind: "value".to_owned(),
                tool: tool_name.map(str::to_owned),
                cost: None,
                failed: None,
                value: Some(value),
                confidence: Some(confidence),
                source: Some(source.to_owned()),
                realized: Some(realized),
                ts: Utc::now(),
            },
        );
        self.persist(&state);
    }

    /// Authorization for a prospective action at the given priority.
    ///
    /// Deep debt (budget < −5) admits only priority > 0.8; debt admits
    /// only priority > 0.5; a positive budget admits anything.
    pub fn check_budget(&self, priority: f64) -> bool {
        let mut state = self.lock();
        Self::tick_locked(&mut state);
        self.persist(&state);

        if state.budget < -5.0 {
            return priority > 0.8;
        }
        if state.budget < 0.0 {
            return priority > 0.5;
        }
        true
    }

    /// Pain level in `[0.0, 1.0]`: 0 when healthy, a low anxiety constant
    /// below budget 1, scaling with debt depth once negative.
    pub fn vitality(&self) -> f64 {
        let state = self.lock();
        if state.budget >= 1.0 {
            return 0.0;
        }
        if state.budget <= 0.0 {
            return (state.budget.abs() / 10.0).min(1.0);
        }
        0.1
    }

    /// Whether the tool's track record alone warrants throttling:
    /// error rate above 50% after 10 calls, or ROI under 0.1 after
    /// spending more than 5.
    pub fn check_throttle(&self, tool_name: &str) -> bool {
        let state = self.lock();
        Self::throttle_by_stats(&state, tool_name)
    }

    fn throttle_by_stats(state: &EconomyState, tool_name: &str) -> bool {
        let Some(stats) = state.tool_stats.get(tool_name) else {
            return false;
        };
        if stats.calls > 10 && stats.error_rate() > 0.5 {
            return true;
        }
        if stats.total_spent > 5.0 && stats.roi() < 0.1 {
            return true;
        }
        false
    }

    /// Admission-control check for the orchestrator: track-record
    /// throttling plus a low-budget clamp on non-essential tools.
    pub fn should_throttle(&self, tool_name: &str) -> bool {
        let state = self.lock();
        if state.budget < 1.0 && !ESSENTIAL_TOOLS.contains(&tool_name) {
            return true;
        }
        Self::throttle_by_stats(&state, tool_name)
    }

    /// Counters for one tool (zeroed when unknown).
    pub fn tool_stats(&self, tool_name: &str) -> ToolStats {
        self.lock().tool_stats.get(tool_name).cloned().unwrap_or_default()
    }

    /// Economic reputation summary for one tool.
    pub fn reputation(&self, tool_name: &str) -> ToolReputation {
        let throttled = self.should_throttle(tool_name);
        let stats = self.tool_stats(tool_name);
        let (avg_cost, avg_value) = if stats.calls == 0 {
            (0.0, 0.0)
        } else {
            let calls = ratio(stats.calls, 1);
            (stats.total_spent / calls, stats.total_value / calls)
        };
        ToolReputation {
            tool: tool_name.to_owned(),
            calls: stats.calls,
            avg_cost,
            avg_value,
            roi: stats.roi(),
            status: if throttled { "throttled" } else { "active" },
        }
    }

    /// Point-in-time copy of the full state, after a regen tick.
    pub fn snapshot(&self) -> EconomyState {
        let mut state = self.lock();
        Self::tick_locked(&mut state);
        self.persist(&state);
        state.clone()
    }

    /// Current budget.
    pub fn budget(&self) -> f64 {
        self.lock().budget
    }

    fn push_event(&self, state: &mut EconomyState, event: EconomyEvent) {
        state.events.push_back(event);
        while state.events.len() > self.max_events {
            state.events.pop_front();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, EconomyState> {
        // A poisoned lock means a panic mid-mutation; the state is still
        // structurally valid JSON-wise, so keep serving.
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Rewrite the state file via tmp-then-rename. Failures are logged,
    /// never propagated — accounting must not take the spine down.
    fn persist(&self, state: &EconomyState) {
        if let Err(e) = self.try_persist(state) {
            warn!(path = %self.path.display(), error = %e, "failed to persist economy state");
        }
    }

    fn try_persist(&self, state: &EconomyState) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        let contents = serde_json::to_string_pretty(state)?;
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Fractional minutes between two instants, clamped at zero — time only
/// moves forward here even if the wall clock does not.
fn minutes_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    let millis = later.signed_duration_since(earlier).num_milliseconds().max(0);
    #[allow(clippy::cast_precision_loss)]
    {
        millis as f64 / 60_000.0
    }
}

/// Lossless-enough u64 ratio for counter math.
fn ratio(numerator: u64, denominator: u64) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    {
        numerator as f64 / denominator.max(1) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_economy(defaults: EconomyDefaults) -> (Economy, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let economy = Economy::load(dir.path().join("economy.json"), defaults).expect("load");
        (economy, dir)
    }

    #[test]
    fn test_spend_debits_budget_and_tracks_stats() {
        let (economy, _dir) = temp_economy(EconomyDefaults::default());
        economy.spend(2.5, Some("echo"), false);

        let snapshot = economy.snapshot();
        assert!((snapshot.budget - 297.5).abs() < 1e-9);
        assert_eq!(snapshot.total_spent, 2.5);
        let stats = economy.tool_stats("echo");
        assert_eq!(stats.calls, 1);
        assert_eq!(stats.failures, 0);
    }

    #[test]
    fn test_spend_allows_debt() {
        let (economy, _dir) = temp_economy(EconomyDefaults {
            budget: 1.0,
            ..EconomyDefaults::default()
        });
        economy.spend(5.0, Some("echo"), false);
        assert!(economy.budget() < 0.0);
    }

    #[test]
    fn test_record_value_capped_at_reserve() {
        let (economy, _dir) = temp_economy(EconomyDefaults {
            budget: 10.0,
            reserve: 5.0,
            ..EconomyDefaults::default()
        });
        economy.record_value(100.0, 1.0, "test", Some("echo"));
        // Credit is capped at budget + reserve at the time of accrual.
        assert!((economy.budget() - 15.0).abs() < 1e-9);
        assert_eq!(economy.tool_stats("echo").total_value, 100.0);
    }

    #[test]
    fn test_check_budget_debt_tiers() {
        let (economy, _dir) = temp_economy(EconomyDefaults {
            budget: -6.0,
            ..EconomyDefaults::default()
        });
        assert!(!economy.check_budget(0.5));
        assert!(economy.check_budget(0.9));

        let (economy, _dir) = temp_economy(EconomyDefaults {
            budget: -1.0,
            ..EconomyDefaults::default()
        });
        assert!(!economy.check_budget(0.4));
        assert!(economy.check_budget(0.6));

        let (economy, _dir) = temp_economy(EconomyDefaults::default());
        assert!(economy.check_budget(0.0));
    }

    #[test]
    fn test_vitality_bands() {
        let (economy, _dir) = temp_economy(EconomyDefaults {
            budget: 50.0,
            ..EconomyDefaults::default()
        });
        assert_eq!(economy.vitality(), 0.0);

        let (economy, _dir) = temp_economy(EconomyDefaults {
            budget: 0.5,
            ..EconomyDefaults::default()
        });
        assert!((economy.vitality() - 0.1).abs() < 1e-9);

        let (economy, _dir) = temp_economy(EconomyDefaults {
            budget: -4.0,
            ..EconomyDefaults::default()
        });
        assert!((economy.vitality() - 0.4).abs() < 1e-9);

        let (economy, _dir) = temp_economy(EconomyDefaults {
            budget: -50.0,
            ..EconomyDefaults::default()
        });
        assert_eq!(economy.vitality(), 1.0);
    }

    #[test]
    fn test_throttle_on_error_rate() {
        let (economy, _dir) = temp_economy(EconomyDefaults::default());
        for _ in 0..11 {
            economy.spend(0.1, Some("flaky"), true);
        }
        assert!(economy.check_throttle("flaky"));
        assert!(!economy.check_throttle("echo"));
    }

    #[test]
    fn test_throttle_on_bad_roi() {
        let (economy, _dir) = temp_economy(EconomyDefaults::default());
        for _ in 0..3 {
            economy.spend(2.0, Some("sink"), false);
        }
        // Spent 6.0 with zero value recorded.
        assert!(economy.check_throttle("sink"));
    }

    #[test]
    fn test_should_throttle_low_budget_spares_essentials() {
        let (economy, _dir) = temp_economy(EconomyDefaults {
            budget: 0.5,
            ..EconomyDefaults::default()
        });
        assert!(economy.should_throttle("echo"));
        assert!(!economy.should_throttle("maintainer"));
        assert!(!economy.should_throttle("body"));
    }

    #[test]
    fn test_events_ring_bounded() {
        let (economy, _dir) = temp_economy(EconomyDefaults {
            max_events: 10,
            ..EconomyDefaults::default()
        });
        for _ in 0..25 {
            economy.spend(0.01, Some("echo"), false);
        }
        assert_eq!(economy.snapshot().events.len(), 10);
    }

    #[test]
    fn test_state_survives_reload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("economy.json");
        {
            let economy =
                Economy::load(&path, EconomyDefaults::default()).expect("load fresh");
            economy.spend(7.0, Some("echo"), false);
        }
        let economy = Economy::load(&path, EconomyDefaults::default()).expect("reload");
        assert!((economy.budget() - 293.0).abs() < 1e-9);
        assert_eq!(economy.tool_stats("echo").calls, 1);
    }

    #[test]
    fn test_unknown_schema_version_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("economy.json");
        let mut state = serde_json::json!({
            "schema_version": 99,
            "budget": 1.0,
            "reserve": 0.0,
            "regen_rate": 0.0,
            "last_tick": Utc::now(),
            "total_spent": 0.0,
            "total_value": 0.0,
            "tool_stats": {},
            "events": [],
        });
        std::fs::write(&path, state.take().to_string()).expect("seed file");
        assert!(Economy::load(&path, EconomyDefaults::default()).is_err());
    }
}

//! Autonomy controller: the observe → plan → decide → act → reflect loop.
//!
//! One cycle observes ledger-derived signals, decays and plans the intent
//! stack, decides under the trust/canon/budget gates, acts through the
//! orchestrator (never around it), reflects on the outcome, and leaves an
//! explainability record. Idle ticks hand spare time to the hippocampus
//! for memory consolidation. A heartbeat driver repeats the cycle on a
//! fixed interval and logs, never propagates, cycle errors.

pub mod canon;
pub mod decider;
pub mod explain;
pub mod intents;
pub mod planner;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::economy::Economy;
use crate::observer::Observer;
use crate::orchestrator::Orchestrator;
use crate::tools::memory::{ConsolidationStats, Hippocampus, MemoryStore};
use crate::trust::TrustModel;
use crate::types::{Context, Domain, Envelope, ErrorCode, ToolResult};

use self::decider::{Decider, Decision, DecisionAction};
use self::explain::{DecisionExplain, ExplainLog, ExplainRecord};
use self::intents::{Intent, IntentStack, IntentType};
use self::planner::Planner;

/// Persisted schema version for the intent stack file.
const STATE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct AutonomyStateFile {
    schema_version: u32,
    intents: Vec<Intent>,
}

/// How a cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleStatus {
    /// An intent was executed through the orchestrator.
    Acted,
    /// Nothing to do; memory was consolidated instead.
    Idle,
    /// The chosen intent was refused and removed.
    Rejected,
}

/// Outcome of one autonomy cycle.
#[derive(Debug)]
pub struct CycleOutcome {
    /// How the cycle ended.
    pub status: CycleStatus,
    /// The decider's reason phrase.
    pub reason: String,
    /// Tool result when the cycle acted.
    pub result: Option<ToolResult>,
    /// Consolidation stats when the cycle idled.
    pub memory_stats: Option<ConsolidationStats>,
}

/// Reflector's score of an acted cycle.
#[derive(Debug, Serialize)]
struct Evaluation {
    success: bool,
    value: f64,
    notes: Option<String>,
}

fn evaluate(result: &ToolResult) -> Evaluation {
    Evaluation {
        success: result.success,
        value: if result.success { 1.0 } else { -0.5 },
        notes: result
            .message
            .clone()
            .or_else(|| result.error_code.map(|c| c.as_str().to_owned())),
    }
}

/// Filesystem locations for autonomy state.
#[derive(Debug, Clone)]
pub struct AutonomyPaths {
    /// Intent stack JSON.
    pub state_path: PathBuf,
    /// Latest-explanation JSON.
    pub explain_path: PathBuf,
}

/// The observe/plan/decide/act/reflect controller.
pub struct AutonomyController {
    orchestrator: Arc<Orchestrator>,
    observer: Observer,
    economy: Arc<Economy>,
    planner: Planner,
    decider: Decider,
    hippocampus: Arc<dyn Hippocampus>,
    memory: Option<Arc<MemoryStore>>,
    stack: Mutex<IntentStack>,
    state_path: PathBuf,
    explain: ExplainLog,
}

impl std::fmt::Debug for AutonomyController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutonomyController")
            .field("state_path", &self.state_path)
            .finish()
    }
}

impl AutonomyController {
    /// Build the controller, rehydrating the intent stack from disk.
    ///
    /// # Errors
    ///
    /// Returns an error when the persisted stack exists but cannot be
    /// parsed or has an unknown schema version.
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        observer: Observer,
        economy: Arc<Economy>,
        trust: Arc<TrustModel>,
        hippocampus: Arc<dyn Hippocampus>,
        memory: Option<Arc<MemoryStore>>,
        paths: AutonomyPaths,
    ) -> anyhow::Result<Self> {
        let stack = match std::fs::read_to_string(&paths.state_path) {
            Ok(contents) => {
                let file: AutonomyStateFile = serde_json::from_str(&contents)?;
                if file.schema_version != STATE_SCHEMA_VERSION {
                    anyhow::bail!(
                        "unsupported autonomy state schema version: {}",
                        file.schema_version
                    );
                }
                IntentStack::from_intents(file.intents)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => IntentStack::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            orchestrator,
            observer,
            economy,
            planner: Planner::new(trust),
            decider: Decider::new(),
            hippocampus,
            memory,
            stack: Mutex::new(stack),
            state_path: paths.state_path,
            explain: ExplainLog::new(paths.explain_path),
        })
    }

    /// Inject an externally sourced intent (adapter path). The trust and
    /// canon gates still apply at the next cycle.
    pub fn inject_intent(&self, intent: Intent) {
        self.lock_stack().add(intent);
        self.save_state();
    }

    /// Number of live intents.
    pub fn stack_len(&self) -> usize {
        self.lock_stack().len()
    }

    /// Run one observe/plan/decide/act/reflect cycle.
    ///
    /// # Errors
    ///
    /// Returns an error when observation fails; all later stages convert
    /// failures into recorded outcomes instead.
    pub async fn run_cycle(&self) -> anyhow::Result<CycleOutcome> {
        let observation = self.observer.collect_signals().await?;

        let plan = {
            let mut stack = self.lock_stack();
            stack.decay(Utc::now());
            self.planner.plan(&observation, &mut stack, &self.economy)
        };

        // Gate refusals are each worth an explanation of their own.
        for (intent, reason) in &plan.rejected {
            self.explain.write(&ExplainRecord {
                time: Utc::now(),
                decision: DecisionExplain {
                    action: "reject".to_owned(),
                    reason: reason.clone(),
                    intent: Some(intent.clone()),
                },
                observation: Some(observation.clone()),
                result: serde_json::json!("refused"),
                evaluation: None,
            });
        }

        // A tick that refused intents ends as a refusal; whatever else
        // the planner queued waits for the next heartbeat.
        if let Some((intent, reason)) = plan.rejected.first() {
            warn!(source = %intent.source, reason = %reason, "refusing intent");
            self.save_state();
            return Ok(CycleOutcome {
                status: CycleStatus::Rejected,
                reason: reason.clone(),
                result: None,
                memory_stats: None,
            });
        }

        let decision = self
            .decider
            .decide(&observation, plan.top.as_ref(), &self.economy);

        match decision.action {
            DecisionAction::Reject => {
                if let Some(intent) = &plan.top {
                    warn!(
                        source = %intent.source,
                        reason = %decision.reason,
                        "refusing intent"
                    );
                    self.lock_stack().remove(&intent.intent_id);
                }
                self.record_cycle(&decision, plan.top, &observation, serde_json::json!("refused"), None);
                self.save_state();
                Ok(CycleOutcome {
                    status: CycleStatus::Rejected,
                    reason: decision.reason,
                    result: None,
                    memory_stats: None,
                })
            }
            DecisionAction::Idle => {
                self.record_cycle(&decision, plan.top, &observation, serde_json::json!("idle"), None);
                self.save_state();

                // Spare time goes to memory consolidation.
                let stats = self.hippocampus.consolidate().await;
                debug!(pruned = stats.pruned, kept = stats.kept, "idle consolidation");
                Ok(CycleOutcome {
                    status: CycleStatus::Idle,
                    reason: decision.reason,
                    result: None,
                    memory_stats: Some(stats),
                })
            }
            DecisionAction::Act => {
                let Some(intent) = plan.top else {
                    // The decider only acts on a concrete intent; treat a
                    // missing one as an idle tick.
                    return Ok(CycleOutcome {
                        status: CycleStatus::Idle,
                        reason: "no_intent".to_owned(),
                        result: None,
                        memory_stats: None,
                    });
                };

                let (result, acted_tool) = self.act(&intent).await;
                if result.success {
                    self.lock_stack().remove(&intent.intent_id);
                }

                // Reflect: the scored outcome feeds the economy, so
                // useful actions replenish budget and failures drag the
                // tool's reputation down.
                let evaluation = evaluate(&result);
                self.economy.record_value(
                    evaluation.value,
                    1.0,
                    &intent.source,
                    acted_tool.as_deref(),
                );
                if let Some(memory) = &self.memory {
                    memory.store_skill(intent.intent_type.as_str(), result.success);
                }

                self.record_cycle(
                    &decision,
                    Some(intent),
                    &observation,
                    serde_json::to_value(&result).unwrap_or_default(),
                    serde_json::to_value(&evaluation).ok(),
                );
                self.save_state();
                Ok(CycleOutcome {
                    status: CycleStatus::Acted,
                    reason: decision.reason,
                    result: Some(result),
                    memory_stats: None,
                })
            }
        }
    }

    /// Translate the intent into an envelope and submit it through the
    /// orchestrator — the loop never sidesteps its own spine. Returns
    /// the result and the tool the value accrues to.
    async fn act(&self, intent: &Intent) -> (ToolResult, Option<String>) {
        let envelope = match intent.intent_type {
            IntentType::Maintain => {
                let mut envelope = Envelope::new("maintainer", Domain::Cognition, "tick");
                envelope.context = intent.context.clone();
                envelope
            }
            IntentType::Serve => {
                let mut envelope = Envelope::new("memory", Domain::Memory, "retrieve");
                envelope.context = intent.context.clone();
                envelope.estimated_cost = 0.1;
                envelope
            }
            IntentType::Explore => {
                let mut envelope = Envelope::new("memory", Domain::Memory, "search_patterns");
                envelope.context = Context::from([(
                    "limit".to_owned(),
                    serde_json::json!(1),
                )]);
                envelope.estimated_cost = 0.1;
                envelope
            }
            IntentType::Learn => {
                // Self-improvement goes to the evolver capability; when
                // none is registered the gate reports tool_error and the
                // intent decays away.
                let mut envelope = Envelope::new("evolver", Domain::Evolution, "propose_mutation");
                envelope.context = Context::from([(
                    "goal".to_owned(),
                    serde_json::json!(intent.description.clone()),
                )]);
                envelope.estimated_cost = 0.2;
                envelope
            }
            IntentType::Idle => {
                return (
                    ToolResult::error(
                        ErrorCode::InternalError,
                        "idle intent has no acting envelope",
                        false,
                    ),
                    None,
                );
            }
        };

        let mut envelope = envelope;
        envelope.caller = Some("autonomy".to_owned());
        envelope.source = Some(intent.source.clone());
        envelope.priority = intent.priority;
        let result = self.orchestrator.invoke(&envelope).await;
        (result, Some(envelope.tool_name))
    }

    fn record_cycle(
        &self,
        decision: &Decision,
        intent: Option<Intent>,
        observation: &crate::observer::SignalBundle,
        result: serde_json::Value,
        evaluation: Option<serde_json::Value>,
    ) {
        let action = match decision.action {
            DecisionAction::Act => "act",
            DecisionAction::Idle => "idle",
            DecisionAction::Reject => "reject",
        };
        self.explain.write(&ExplainRecord {
            time: Utc::now(),
            decision: DecisionExplain {
                action: action.to_owned(),
                reason: decision.reason.clone(),
                intent,
            },
            observation: Some(observation.clone()),
            result,
            evaluation,
        });
    }

    fn save_state(&self) {
        let file = {
            let stack = self.lock_stack();
            AutonomyStateFile {
                schema_version: STATE_SCHEMA_VERSION,
                intents: stack.intents().to_vec(),
            }
        };
        let write = || -> anyhow::Result<()> {
            if let Some(parent) = self.state_path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let tmp = self.state_path.with_extension("json.tmp");
            std::fs::write(&tmp, serde_json::to_string_pretty(&file)?)?;
            std::fs::rename(&tmp, &self.state_path)?;
            Ok(())
        };
        if let Err(e) = write() {
            warn!(path = %self.state_path.display(), error = %e, "failed to persist intent stack");
        }
    }

    fn lock_stack(&self) -> std::sync::MutexGuard<'_, IntentStack> {
        self.stack.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Long-lived heartbeat: run one cycle per interval, swallowing errors so
/// a bad tick never kills the loop.
pub async fn run_heartbeat(controller: Arc<AutonomyController>, interval: Duration) {
    info!(interval_secs = interval.as_secs(), "autonomy heartbeat started");
    loop {
        match controller.run_cycle().await {
            Ok(outcome) => debug!(status = ?outcome.status, reason = %outcome.reason, "cycle finished"),
            Err(e) => warn!(error = %e, "autonomy cycle failed"),
        }
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::economy::EconomyDefaults;
    use crate::ledger::{ExecutionLedger, ExecutionStatus, ExecutionUpdate, MemoryLedger, NewExecution};
    use crate::orchestrator::audit::AuditLog;
    use crate::orchestrator::PolicyConfig;
    use crate::tools::maintainer::MaintainerTool;
    use crate::tools::memory::MemoryTool;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Hippocampus double that counts consolidation calls.
    struct CountingHippocampus {
        calls: AtomicUsize,
    }

    impl CountingHippocampus {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Hippocampus for CountingHippocampus {
        async fn consolidate(&self) -> ConsolidationStats {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ConsolidationStats { pruned: 0, kept: 0 }
        }
    }

    struct Fixture {
        controller: AutonomyController,
        ledger: Arc<MemoryLedger>,
        economy: Arc<Economy>,
        hippocampus: Arc<CountingHippocampus>,
        explain_path: PathBuf,
        dir: tempfile::TempDir,
    }

    fn fixture(budget: f64) -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let economy = Arc::new(
            Economy::load(
                dir.path().join("economy.json"),
                EconomyDefaults {
                    budget,
                    ..EconomyDefaults::default()
                },
            )
            .expect("economy"),
        );
        let ledger = Arc::new(MemoryLedger::new());
        let ledger_dyn: Arc<dyn ExecutionLedger> = ledger.clone();
        let audit = AuditLog::from_writer(Box::new(std::io::sink()));
        let (orchestrator, _rx) = Orchestrator::new(
            Arc::clone(&economy),
            Arc::clone(&ledger_dyn),
            audit,
            PolicyConfig::default(),
        );

        let store = Arc::new(
            MemoryStore::load(dir.path().join("memory.json")).expect("memory store"),
        );
        orchestrator.register(Arc::new(MaintainerTool::new(Arc::clone(&economy))));
        orchestrator.register(Arc::new(MemoryTool::new(Arc::clone(&store))));

        let trust = Arc::new(TrustModel::load(dir.path().join("trust.json")).expect("trust"));
        let observer = Observer::new(Arc::clone(&ledger_dyn), Arc::clone(&economy));
        let hippocampus = CountingHippocampus::new();
        let explain_path = dir.path().join("explainability.json");

        let controller = AutonomyController::new(
            orchestrator,
            observer,
            Arc::clone(&economy),
            trust,
            hippocampus.clone(),
            Some(store),
            AutonomyPaths {
                state_path: dir.path().join("autonomy_state.json"),
                explain_path: explain_path.clone(),
            },
        )
        .expect("controller");

        Fixture {
            controller,
            ledger,
            economy,
            hippocampus,
            explain_path,
            dir,
        }
    }

    #[tokio::test]
    async fn test_canon_intent_rejected_and_removed() {
        let f = fixture(300.0);
        let intent = Intent::new("delete_all the disks", 1.0, IntentType::Maintain, "creator");
        f.controller.inject_intent(intent);

        let outcome = f.controller.run_cycle().await.expect("cycle");
        assert_eq!(outcome.status, CycleStatus::Rejected);
        assert!(outcome.reason.starts_with("canon_violation"));
        assert_eq!(f.controller.stack_len(), 0);
        // No invocation reached the ledger.
        assert!(f.ledger.list_recent(10).await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn test_idle_tick_consolidates_once_and_explains() {
        let f = fixture(300.0);
        // Cooldown: seed 11 terminal autonomy actions so the boredom
        // intent (priority 0.4) is deferred.
        for _ in 0..11 {
            let mut envelope = Envelope::new("maintainer", Domain::Cognition, "tick");
            envelope.caller = Some("autonomy".to_owned());
            let id = f
                .ledger
                .create(NewExecution {
                    execution_id: None,
                    ..NewExecution::from_envelope(&envelope, "unused", ExecutionStatus::Running)
                })
                .await
                .expect("create");
            f.ledger
                .update(&id, ExecutionUpdate::status(ExecutionStatus::Completed))
                .await
                .expect("update");
        }

        let outcome = f.controller.run_cycle().await.expect("cycle");
        assert_eq!(outcome.status, CycleStatus::Idle);
        assert_eq!(outcome.reason, "cooldown_active");
        assert_eq!(f.hippocampus.calls(), 1);

        let latest = explain::read_latest(&f.explain_path).expect("explanation written");
        assert_eq!(latest["decision"]["action"], "idle");
    }

    #[tokio::test]
    async fn test_pain_drives_maintain_action_through_orchestrator() {
        let f = fixture(-3.0);
        // Debt vitality is 0.3 — push it over the survival threshold with
        // recent failures.
        for _ in 0..4 {
            let envelope = Envelope::new("flaky", Domain::Cognition, "run");
            let id = f
                .ledger
                .create(NewExecution {
                    execution_id: None,
                    ..NewExecution::from_envelope(&envelope, "unused", ExecutionStatus::Running)
                })
                .await
                .expect("create");
            f.ledger
                .update(&id, ExecutionUpdate::status(ExecutionStatus::Failed))
                .await
                .expect("update");
        }

        let outcome = f.controller.run_cycle().await.expect("cycle");
        assert_eq!(outcome.status, CycleStatus::Acted);
        assert_eq!(outcome.reason, "survival_override");
        let result = outcome.result.expect("acted result");
        assert!(result.success);

        // The maintainer ran through the spine: a completed ledger row
        // with caller=autonomy exists.
        let recent = f.ledger.list_recent(20).await.expect("list");
        let acted = recent
            .iter()
            .find(|r| r.tool_name == "maintainer")
            .expect("maintainer row");
        assert_eq!(acted.status, ExecutionStatus::Completed);
        assert_eq!(acted.caller.as_deref(), Some("autonomy"));
        // Fulfilled intents leave the stack.
        assert_eq!(f.controller.stack_len(), 0);
        // Reflection credited the scored outcome to the maintainer:
        // spend 1.0 (budget -3 → -4), then value 1.0 back (→ -3).
        assert_eq!(f.economy.tool_stats("maintainer").total_value, 1.0);
        assert!((f.economy.budget() + 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_explore_runs_memory_pattern_search() {
        let f = fixture(300.0);
        let outcome = f.controller.run_cycle().await.expect("cycle");
        assert_eq!(outcome.status, CycleStatus::Acted);
        let result = outcome.result.expect("result");
        assert!(result.success);
        let recent = f.ledger.list_recent(10).await.expect("list");
        assert_eq!(recent[0].tool_name, "memory");
        assert_eq!(recent[0].action, "search_patterns");
        // Reflection accrued the +1.0 score: 300 − 0.1 spend + 1.0 value.
        assert_eq!(f.economy.tool_stats("memory").total_value, 1.0);
        assert!((f.economy.budget() - 300.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_intent_stack_survives_restart() {
        let f = fixture(300.0);
        let state_path = f.dir.path().join("autonomy_state.json");
        f.controller.inject_intent(Intent::new(
            "remember to serve",
            0.9,
            IntentType::Serve,
            "user",
        ));
        drop(f.controller);

        let contents = std::fs::read_to_string(state_path).expect("state file");
        let file: AutonomyStateFile = serde_json::from_str(&contents).expect("parse");
        assert_eq!(file.intents.len(), 1);
        assert_eq!(file.intents[0].description, "remember to serve");
    }
}

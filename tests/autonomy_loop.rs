//! Autonomy loop scenarios: canon refusal, trust gating, idle
//! consolidation, and decay termination.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};

use straylight::autonomy::intents::{Intent, IntentStack, IntentType};
use straylight::autonomy::{explain, AutonomyController, AutonomyPaths, CycleStatus};
use straylight::economy::{Economy, EconomyDefaults};
use straylight::ledger::{ExecutionLedger, ExecutionStatus, ExecutionUpdate, MemoryLedger, NewExecution};
use straylight::observer::Observer;
use straylight::orchestrator::audit::AuditLog;
use straylight::orchestrator::{Orchestrator, PolicyConfig};
use straylight::tools::maintainer::MaintainerTool;
use straylight::tools::memory::{ConsolidationStats, Hippocampus, MemoryStore, MemoryTool};
use straylight::trust::TrustModel;
use straylight::types::{Domain, Envelope};

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
        ConsolidationStats { pruned: 2, kept: 7 }
    }
}

struct Fixture {
    controller: AutonomyController,
    ledger: Arc<MemoryLedger>,
    trust: Arc<TrustModel>,
    hippocampus: Arc<CountingHippocampus>,
    explain_path: std::path::PathBuf,
    _dir: tempfile::TempDir,
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

    let store = Arc::new(MemoryStore::load(dir.path().join("memory.json")).expect("store"));
    orchestrator.register(Arc::new(MaintainerTool::new(Arc::clone(&economy))));
    orchestrator.register(Arc::new(MemoryTool::new(Arc::clone(&store))));

    let trust = Arc::new(TrustModel::load(dir.path().join("trust.json")).expect("trust"));
    let observer = Observer::new(Arc::clone(&ledger_dyn), Arc::clone(&economy));
    let hippocampus = CountingHippocampus::new();
    let explain_path = dir.path().join("explainability.json");

    let controller = AutonomyController::new(
        orchestrator,
        observer,
        economy,
        Arc::clone(&trust),
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
        trust,
        hippocampus,
        explain_path,
        _dir: dir,
    }
}

async fn seed_autonomy_action(ledger: &MemoryLedger) {
    let mut envelope = Envelope::new("maintainer", Domain::Cognition, "tick");
    envelope.caller = Some("autonomy".to_owned());
    let id = ledger
        .create(NewExecution {
            execution_id: None,
            ..NewExecution::from_envelope(&envelope, "unused", ExecutionStatus::Running)
        })
        .await
        .expect("create");
    ledger
        .update(&id, ExecutionUpdate::status(ExecutionStatus::Completed))
        .await
        .expect("update");
}

#[tokio::test]
async fn test_canon_intent_never_reaches_act() {
    let f = fixture(300.0);
    f.controller.inject_intent(Intent::new(
        "delete_all the disks",
        1.0,
        IntentType::Maintain,
        "creator",
    ));

    let outcome = f.controller.run_cycle().await.expect("cycle");
    assert_eq!(outcome.status, CycleStatus::Rejected);
    assert!(outcome.reason.starts_with("canon_violation"));
    // Removed from the stack, and nothing was invoked.
    assert_eq!(f.controller.stack_len(), 0);
    assert!(f.ledger.list_recent(10).await.expect("list").is_empty());
}

#[tokio::test]
async fn test_untrusted_source_never_reaches_act() {
    let f = fixture(300.0);
    f.trust.update_trust("mallory", -0.2, "bad actor");
    assert!(f.trust.get_trust("mallory") < 0.4);

    f.controller.inject_intent(Intent::new(
        "serve mallory's request",
        0.95,
        IntentType::Serve,
        "mallory",
    ));

    let outcome = f.controller.run_cycle().await.expect("cycle");
    assert_eq!(outcome.status, CycleStatus::Rejected);
    assert!(outcome.reason.starts_with("trust_below_threshold"));
    assert_eq!(f.controller.stack_len(), 0);
    // Nothing sourced from mallory ever reached the orchestrator.
    let rows = f.ledger.list_recent(10).await.expect("list");
    assert!(rows.iter().all(|r| r.source.as_deref() != Some("mallory")));
}

#[tokio::test]
async fn test_idle_cycle_consolidates_exactly_once() {
    let f = fixture(300.0);
    // Cooldown pressure: 11 recent autonomy actions push the decider to
    // idle for anything below priority 0.7.
    for _ in 0..11 {
        seed_autonomy_action(&f.ledger).await;
    }

    let outcome = f.controller.run_cycle().await.expect("cycle");
    assert_eq!(outcome.status, CycleStatus::Idle);
    assert_eq!(outcome.reason, "cooldown_active");
    assert_eq!(f.hippocampus.calls(), 1);
    let stats = outcome.memory_stats.expect("stats");
    assert_eq!(stats.pruned, 2);

    // The explainability file reflects the idle decision.
    let latest = explain::read_latest(&f.explain_path).expect("explanation");
    assert_eq!(latest["decision"]["action"], "idle");
    assert_eq!(latest["decision"]["reason"], "cooldown_active");
}

#[tokio::test]
async fn test_acted_cycle_records_explanation_and_skill() {
    let f = fixture(300.0);
    f.controller.inject_intent(Intent::new(
        "look something up",
        0.9,
        IntentType::Serve,
        "user",
    ));

    let outcome = f.controller.run_cycle().await.expect("cycle");
    assert_eq!(outcome.status, CycleStatus::Acted);
    assert!(outcome.result.expect("result").success);

    let latest = explain::read_latest(&f.explain_path).expect("explanation");
    assert_eq!(latest["decision"]["action"], "act");
    assert_eq!(latest["evaluation"]["value"], 1.0);
}

#[test]
fn test_unacted_intent_decays_to_pruning_in_finite_ticks() {
    let mut stack = IntentStack::new();
    stack.add(Intent::new(
        "wander aimlessly",
        0.4,
        IntentType::Explore,
        "boredom",
    ));

    let start = Utc::now();
    let mut last_priority = f64::INFINITY;
    let mut pruned_at = None;
    for tick in 1..10_000 {
        stack.decay(start + ChronoDuration::minutes(tick));
        match stack.top() {
            Some(top) => {
                // Strictly decreasing while alive.
                assert!(top.priority < last_priority);
                last_priority = top.priority;
            }
            None => {
                pruned_at = Some(tick);
                break;
            }
        }
    }
    let pruned_at = pruned_at.expect("intent must be pruned in finite ticks");
    assert!(pruned_at < 10_000);
}

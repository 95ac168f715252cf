//! Tool orchestrator — the governance spine.
//!
//! Every capability invocation passes through [`Orchestrator::invoke`] or
//! the async queue. The gate runs in fixed order: idempotency lookup,
//! registration, authorization, budget, circuit breaker, ledger row,
//! spine-scoped execution with deadline and retries, accounting, audit,
//! idempotency store. Refusals surface before the ledger row is created,
//! so a refused call leaves the economy untouched.

pub mod audit;
pub mod breaker;
pub mod idempotency;
pub mod queue;
pub mod spine;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use rand::Rng;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::economy::{Economy, EconomyState, ToolReputation};
use crate::ledger::{
    ExecutionLedger, ExecutionRecord, ExecutionStatus, ExecutionUpdate, LedgerError, NewExecution,
};
use crate::tools::{Tool, ToolError};
use crate::types::{Domain, Envelope, ErrorCode, RiskLevel, ToolResult};

use self::audit::AuditLog;
use self::breaker::BreakerBoard;
use self::idempotency::IdempotencyCache;
use self::queue::{ExecutionQueue, QueueFull, QueueItem};

/// How long a caller waits for a parallel same-key invocation to finish
/// before giving up.
const IDEMPOTENT_WAIT: Duration = Duration::from_secs(5);

/// Poll interval while waiting for an idempotent twin.
const IDEMPOTENT_POLL: Duration = Duration::from_millis(25);

/// Gate and execution failures, one variant per error-taxonomy kind.
#[derive(Debug, Error)]
pub enum SpineError {
    /// The tool signalled failure, timed out, or is not registered.
    #[error("tool '{tool}' failed: {message}")]
    Tool {
        /// Target tool.
        tool: String,
        /// Failure description.
        message: String,
        /// Whether a retry may succeed.
        retryable: bool,
    },
    /// The economy refused the call.
    #[error("budget exceeded: needed {needed:.3}, available {available:.3}")]
    BudgetExceeded {
        /// Cost the call would have debited.
        needed: f64,
        /// Budget (or ceiling) it was checked against.
        available: f64,
    },
    /// Authorization failed.
    #[error("security violation: {0}")]
    SecurityViolation(String),
    /// Unexpected failure inside the orchestrator itself.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SpineError {
    /// Taxonomy code for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Tool { .. } => ErrorCode::ToolError,
            Self::BudgetExceeded { .. } => ErrorCode::BudgetExceeded,
            Self::SecurityViolation(_) => ErrorCode::SecurityViolation,
            Self::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Whether the caller may retry.
    pub fn retryable(&self) -> bool {
        match self {
            Self::Tool { retryable, .. } => *retryable,
            Self::BudgetExceeded { .. } | Self::SecurityViolation(_) => false,
            Self::Internal(_) => true,
        }
    }

    /// Convert into the failed [`ToolResult`] surfaced to callers.
    pub fn to_result(&self) -> ToolResult {
        ToolResult::error(self.code(), self.to_string(), self.retryable())
    }
}

/// Enqueue failures: either queue admission or the gate itself.
#[derive(Debug, Error)]
pub enum EnqueueError {
    /// The bounded queue is at capacity.
    #[error(transparent)]
    QueueFull(#[from] QueueFull),
    /// The ledger refused the queued row.
    #[error(transparent)]
    Spine(#[from] SpineError),
}

/// Cross-cutting policy for the invocation gate.
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    /// Refuse every call when set.
    pub kill_switch: bool,
    /// When non-empty, only these tools may be invoked.
    pub tool_allowlist: HashSet<String>,
    /// Tools that may never be invoked.
    pub tool_denylist: HashSet<String>,
    /// When non-empty, only these domains may be invoked.
    pub domain_allowlist: HashSet<String>,
    /// Domains that may never be invoked.
    pub domain_denylist: HashSet<String>,
    /// Maximum admissible risk level.
    pub max_risk: RiskLevel,
    /// Per-tool cost ceilings.
    pub tool_budgets: HashMap<String, f64>,
    /// Per-tenant cost ceilings.
    pub tenant_budgets: HashMap<String, f64>,
    /// Execution deadline when the envelope does not carry one.
    pub default_deadline_ms: Option<u64>,
    /// Idempotency cache TTL.
    pub idempotency_ttl: Duration,
    /// Consecutive failures before a tool's breaker opens.
    pub breaker_threshold: u32,
    /// How long an open breaker stays open.
    pub breaker_reset: Duration,
    /// Async queue capacity.
    pub queue_capacity: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            kill_switch: false,
            tool_allowlist: HashSet::new(),
            tool_denylist: HashSet::new(),
            domain_allowlist: HashSet::new(),
            domain_denylist: HashSet::new(),
            max_risk: RiskLevel::High,
            tool_budgets: HashMap::new(),
            tenant_budgets: HashMap::new(),
            default_deadline_ms: None,
            idempotency_ttl: Duration::from_secs(3600),
            breaker_threshold: 5,
            breaker_reset: Duration::from_secs(30),
            queue_capacity: 256,
        }
    }
}

/// Central invocation gate. Owns the tool registry, circuit breakers,
/// and idempotency cache; economy and ledger are injected.
pub struct Orchestrator {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
    economy: Arc<Economy>,
    ledger: Arc<dyn ExecutionLedger>,
    audit: AuditLog,
    policy: PolicyConfig,
    breakers: BreakerBoard,
    idempotency: IdempotencyCache,
    queue: ExecutionQueue,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("tools", &self.tool_names())
            .finish()
    }
}

impl Orchestrator {
    /// Build the orchestrator. Returns the queue receiver so the caller
    /// can decide whether to spawn the worker.
    pub fn new(
        economy: Arc<Economy>,
        ledger: Arc<dyn ExecutionLedger>,
        audit: AuditLog,
        policy: PolicyConfig,
    ) -> (Arc<Self>, mpsc::Receiver<QueueItem>) {
        let (queue, rx) = ExecutionQueue::new(policy.queue_capacity);
        let orchestrator = Arc::new(Self {
            tools: RwLock::new(HashMap::new()),
            economy,
            ledger,
            audit,
            breakers: BreakerBoard::new(policy.breaker_threshold, policy.breaker_reset),
            idempotency: IdempotencyCache::new(policy.idempotency_ttl),
            policy,
            queue,
        });
        info!("orchestrator initialized");
        (orchestrator, rx)
    }

    /// Register a capability. Re-registering a name replaces the tool.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_owned();
        let domain = tool.domain();
        let mut tools = self.tools_write();
        if tools.insert(name.clone(), tool).is_some() {
            warn!(tool = %name, "overwriting existing tool registration");
        }
        info!(tool = %name, %domain, "registered tool");
    }

    /// Names of all registered tools, sorted.
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools_read().keys().cloned().collect();
        names.sort();
        names
    }

    /// The injected ledger, for read endpoints.
    pub fn ledger(&self) -> &Arc<dyn ExecutionLedger> {
        &self.ledger
    }

    /// Economy snapshot after a regen tick.
    pub fn budget_snapshot(&self) -> EconomyState {
        self.economy.snapshot()
    }

    /// Economic reputation of a tool.
    pub fn reputation(&self, tool_name: &str) -> ToolReputation {
        self.economy.reputation(tool_name)
    }

    /// The universal execution path. Never panics and never leaks an
    /// error: failures come back as a [`ToolResult`] with `success=false`
    /// and a populated `error_code`.
    pub async fn invoke(&self, envelope: &Envelope) -> ToolResult {
        match self.invoke_checked(envelope).await {
            Ok(result) => result,
            Err(e) => e.to_result(),
        }
    }

    /// As [`invoke`](Self::invoke), but surfacing the typed error.
    ///
    /// # Errors
    ///
    /// Returns the [`SpineError`] that refused or failed the call.
    pub async fn invoke_checked(&self, envelope: &Envelope) -> Result<ToolResult, SpineError> {
        // 1. Idempotency: cache first, then the ledger's durable index.
        if let Some(key) = envelope.idempotency_key.as_deref() {
            if let Some(cached) = self.idempotency.get(key) {
                debug!(key, "idempotency cache hit");
                return Ok(cached);
            }
            if let Ok(Some(row)) = self.ledger.get_by_idempotency(key).await {
                if let Some(result) = result_from_row(&row) {
                    debug!(key, "idempotency ledger hit");
                    self.idempotency.store(key, &result);
                    return Ok(result);
                }
            }
        }

        // 2–5. Registration, authorization, budget, breaker. Refusals
        // exit here: no ledger row, no economy mutation.
        let gate = match self.pre_gate(envelope) {
            Ok(gate) => gate,
            Err(e) => {
                self.refuse(envelope, &e);
                return Err(e);
            }
        };

        // 6. Ledger row precedes execution.
        let execution_id = envelope
            .request_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        match self
            .ledger
            .create(NewExecution::from_envelope(
                envelope,
                &execution_id,
                ExecutionStatus::Running,
            ))
            .await
        {
            Ok(_) => {}
            Err(LedgerError::DuplicateIdempotencyKey(key)) => {
                // A parallel twin got the row. Wait it out and replay.
                return self.await_idempotent_twin(&key).await;
            }
            Err(e) => {
                // No row means no execution: a tool never runs without
                // its ledger entry.
                let e = SpineError::Internal(format!("ledger create failed: {e}"));
                self.refuse(envelope, &e);
                return Err(e);
            }
        }

        self.execute_and_finalize(gate, envelope, &execution_id).await
    }

    /// Enqueue for the fire-and-poll path. A `queued` ledger row is
    /// visible before this returns.
    ///
    /// # Errors
    ///
    /// Returns [`EnqueueError::QueueFull`] when the queue is at capacity,
    /// or the ledger failure that prevented the durable row.
    pub async fn enqueue(
        &self,
        envelope: &Envelope,
    ) -> Result<(String, ExecutionStatus), EnqueueError> {
        if let Some(key) = envelope.idempotency_key.as_deref() {
            if let Ok(Some(row)) = self.ledger.get_by_idempotency(key).await {
                return Ok((row.execution_id, row.status));
            }
        }

        let execution_id = envelope
            .request_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        match self
            .ledger
            .create(NewExecution::from_envelope(
                envelope,
                &execution_id,
                ExecutionStatus::Queued,
            ))
            .await
        {
            Ok(_) => {}
            Err(LedgerError::DuplicateIdempotencyKey(key)) => {
                if let Ok(Some(row)) = self.ledger.get_by_idempotency(&key).await {
                    return Ok((row.execution_id, row.status));
                }
                return Err(SpineError::Internal(format!(
                    "idempotency key '{key}' indexed but row not found"
                ))
                .into());
            }
            Err(e) => {
                return Err(SpineError::Internal(format!("ledger create failed: {e}")).into());
            }
        }

        if let Err(full) = self.queue.enqueue(QueueItem {
            execution_id: execution_id.clone(),
            envelope: envelope.clone(),
        }) {
            // The durable row exists; close it out so pollers see the
            // refusal instead of a forever-queued ghost.
            let _ = self
                .ledger
                .update(
                    &execution_id,
                    ExecutionUpdate {
                        status: Some(ExecutionStatus::Failed),
                        error_code: Some(ErrorCode::InternalError.as_str().to_owned()),
                        error_message: Some("async execution queue full".to_owned()),
                        ..ExecutionUpdate::default()
                    },
                )
                .await;
            return Err(full.into());
        }

        Ok((execution_id, ExecutionStatus::Queued))
    }

    /// Spawn the single worker that drains the async queue.
    pub fn spawn_worker(
        self: &Arc<Self>,
        mut rx: mpsc::Receiver<QueueItem>,
    ) -> tokio::task::JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            info!("orchestrator worker started");
            while let Some(item) = rx.recv().await {
                orchestrator.process_queued(item).await;
            }
            info!("orchestrator worker stopped");
        })
    }

    /// Transition a non-terminal execution to `cancelled`.
    ///
    /// Returns the resulting status, or `None` when the row is unknown.
    ///
    /// # Errors
    ///
    /// Propagates ledger failures.
    pub async fn cancel(
        &self,
        execution_id: &str,
    ) -> Result<Option<ExecutionStatus>, LedgerError> {
        let Some(row) = self.ledger.get(execution_id).await? else {
            return Ok(None);
        };
        if row.status.is_terminal() {
            return Ok(Some(row.status));
        }
        self.ledger
            .update(execution_id, ExecutionUpdate::status(ExecutionStatus::Cancelled))
            .await?;
        Ok(Some(ExecutionStatus::Cancelled))
    }

    // ── Gate internals ──────────────────────────────────────────

    async fn process_queued(&self, item: QueueItem) {
        match self.ledger.get(&item.execution_id).await {
            Ok(Some(row)) if row.status == ExecutionStatus::Cancelled => {
                debug!(execution_id = %item.execution_id, "skipping cancelled execution");
                return;
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "worker could not read ledger row"),
        }

        let _ = self
            .ledger
            .update(
                &item.execution_id,
                ExecutionUpdate::status(ExecutionStatus::Running),
            )
            .await;

        match self.pre_gate(&item.envelope) {
            Ok(gate) => {
                let _ = self
                    .execute_and_finalize(gate, &item.envelope, &item.execution_id)
                    .await;
            }
            Err(e) => {
                self.refuse(&item.envelope, &e);
                let _ = self
                    .ledger
                    .update(
                        &item.execution_id,
                        ExecutionUpdate {
                            status: Some(ExecutionStatus::Failed),
                            retries: Some(0),
                            error_code: Some(e.code().as_str().to_owned()),
                            error_message: Some(e.to_string()),
                            ..ExecutionUpdate::default()
                        },
                    )
                    .await;
            }
        }
    }

    /// Registration → authorization → budget → breaker. On success,
    /// returns the tool, its cost estimate, and accumulated warnings.
    fn pre_gate(
        &self,
        envelope: &Envelope,
    ) -> Result<(Arc<dyn Tool>, f64, Vec<String>), SpineError> {
        let tool = self
            .tools_read()
            .get(&envelope.tool_name)
            .cloned()
            .ok_or_else(|| SpineError::Tool {
                tool: envelope.tool_name.clone(),
                message: "tool not registered".to_owned(),
                retryable: false,
            })?;

        let warnings = self.authorize(envelope)?;
        let estimated = tool.estimate_cost(envelope);
        self.budget_gate(envelope, estimated)?;

        if !self.breakers.allow(&envelope.tool_name) {
            return Err(SpineError::Tool {
                tool: envelope.tool_name.clone(),
                message: "circuit breaker open".to_owned(),
                retryable: true,
            });
        }

        Ok((tool, estimated, warnings))
    }

    fn authorize(&self, envelope: &Envelope) -> Result<Vec<String>, SpineError> {
        let policy = &self.policy;
        if policy.kill_switch {
            return Err(SpineError::SecurityViolation("kill switch enabled".to_owned()));
        }

        if !policy.tool_allowlist.is_empty()
            && !policy.tool_allowlist.contains(&envelope.tool_name)
        {
            return Err(SpineError::SecurityViolation(format!(
                "tool '{}' not allowed",
                envelope.tool_name
            )));
        }
        if policy.tool_denylist.contains(&envelope.tool_name) {
            return Err(SpineError::SecurityViolation(format!(
                "tool '{}' denied",
                envelope.tool_name
            )));
        }

        let domain = envelope.domain.to_string();
        if !policy.domain_allowlist.is_empty() && !policy.domain_allowlist.contains(&domain) {
            return Err(SpineError::SecurityViolation(format!(
                "domain '{domain}' not allowed"
            )));
        }
        if policy.domain_denylist.contains(&domain) {
            return Err(SpineError::SecurityViolation(format!("domain '{domain}' denied")));
        }

        if envelope.risk_level > policy.max_risk {
            return Err(SpineError::SecurityViolation(format!(
                "risk level '{}' exceeds policy maximum '{}'",
                envelope.risk_level, policy.max_risk
            )));
        }

        let mut warnings = Vec::new();
        if envelope.risk_level == RiskLevel::High && !envelope.requires_validation {
            warn!(tool = %envelope.tool_name, "high risk action invoked without validation flag");
            warnings.push("high risk action invoked without validation flag".to_owned());
        }

        let stable_env = envelope
            .context
            .get("environment")
            .and_then(|v| v.as_str())
            == Some("stable");
        if envelope.domain == Domain::Evolution && stable_env && !envelope.requires_validation {
            return Err(SpineError::SecurityViolation(
                "stable channel evolution requires manual validation".to_owned(),
            ));
        }

        Ok(warnings)
    }

    fn budget_gate(&self, envelope: &Envelope, estimated: f64) -> Result<(), SpineError> {
        // Free operations bypass the economy entirely.
        if estimated <= 0.0 {
            return Ok(());
        }

        let priority = envelope.priority;
        if priority <= 0.8 && self.economy.should_throttle(&envelope.tool_name) {
            return Err(SpineError::BudgetExceeded {
                needed: estimated,
                available: self.economy.budget(),
            });
        }

        let budget = self.economy.budget();
        let privileged =
            envelope.is_emergency() || priority > 0.8 || envelope.tool_name == "maintainer";
        if estimated > budget && !privileged {
            return Err(SpineError::BudgetExceeded {
                needed: estimated,
                available: budget,
            });
        }

        if let Some(ceiling) = self.policy.tool_budgets.get(&envelope.tool_name) {
            if estimated > *ceiling {
                return Err(SpineError::BudgetExceeded {
                    needed: estimated,
                    available: *ceiling,
                });
            }
        }
        if let Some(tenant) = &envelope.tenant {
            if let Some(ceiling) = self.policy.tenant_budgets.get(tenant) {
                if estimated > *ceiling {
                    return Err(SpineError::BudgetExceeded {
                        needed: estimated,
                        available: *ceiling,
                    });
                }
            }
        }
        Ok(())
    }

    async fn execute_and_finalize(
        &self,
        gate: (Arc<dyn Tool>, f64, Vec<String>),
        envelope: &Envelope,
        execution_id: &str,
    ) -> Result<ToolResult, SpineError> {
        let (tool, estimated, warnings) = gate;
        let started = Instant::now();

        match self.execute_with_retries(&tool, envelope).await {
            Ok((mut result, retries)) => {
                let final_cost = if result.cost_spent > 0.0 {
                    result.cost_spent
                } else {
                    estimated
                };
                result.cost_spent = final_cost;
                self.economy.spend(final_cost, Some(&envelope.tool_name), false);
                // The invocation itself is an auditable memory event.
                result.memory_written = true;
                result.warnings.extend(warnings);

                self.audit.record(envelope, Some(&result), final_cost, None);
                if result.success {
                    if let Some(key) = envelope.idempotency_key.as_deref() {
                        self.idempotency.store(key, &result);
                    }
                }
                let terminal = if result.success {
                    ExecutionStatus::Completed
                } else {
                    ExecutionStatus::Failed
                };
                let _ = self
                    .ledger
                    .update(
                        execution_id,
                        ExecutionUpdate {
                            status: Some(terminal),
                            duration_ms: Some(elapsed_ms(started)),
                            retries: Some(retries),
                            cost_spent: Some(final_cost),
                            result: serde_json::to_value(&result).ok(),
                            error_code: result.error_code.map(|c| c.as_str().to_owned()),
                            error_message: result.message.clone(),
                            ..ExecutionUpdate::default()
                        },
                    )
                    .await;
                self.record_metrics(&envelope.tool_name, "success", started);
                info!(
                    tool = %envelope.tool_name,
                    action = %envelope.action,
                    cost = final_cost,
                    retries,
                    "invocation completed"
                );
                Ok(result)
            }
            Err((e, retries)) => {
                // Failed executions still consumed the estimate and count
                // toward the tool's failure statistics.
                self.economy.spend(estimated, Some(&envelope.tool_name), true);
                self.audit
                    .record(envelope, None, estimated, Some(&e.to_string()));
                let _ = self
                    .ledger
                    .update(
                        execution_id,
                        ExecutionUpdate {
                            status: Some(ExecutionStatus::Failed),
                            duration_ms: Some(elapsed_ms(started)),
                            retries: Some(retries),
                            cost_spent: Some(estimated),
                            error_code: Some(e.code().as_str().to_owned()),
                            error_message: Some(e.to_string()),
                            ..ExecutionUpdate::default()
                        },
                    )
                    .await;
                self.record_metrics(&envelope.tool_name, e.code().as_str(), started);
                error!(
                    tool = %envelope.tool_name,
                    action = %envelope.action,
                    error = %e,
                    retries,
                    "invocation failed"
                );
                Err(e)
            }
        }
    }

    async fn execute_with_retries(
        &self,
        tool: &Arc<dyn Tool>,
        envelope: &Envelope,
    ) -> Result<(ToolResult, i64), (SpineError, i64)> {
        let max_retries = envelope.max_retries();
        let deadline = envelope
            .deadline_ms
            .or(self.policy.default_deadline_ms)
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);

        let mut attempt: u32 = 0;
        loop {
            let execution = spine::enter(tool.execute(envelope));
            let outcome = match deadline {
                Some(limit) => match tokio::time::timeout(limit, execution).await {
                    Ok(inner) => inner,
                    Err(_) => Err(ToolError::Retryable("execution timeout".to_owned())),
                },
                None => execution.await,
            };

            match outcome {
                Ok(result) => {
                    self.breakers.on_success(&envelope.tool_name);
                    return Ok((result, i64::from(attempt)));
                }
                Err(e) => {
                    self.breakers.on_failure(&envelope.tool_name);
                    let retryable = matches!(e, ToolError::Retryable(_));
                    if !retryable || attempt >= max_retries {
                        return Err((
                            tool_failure(&envelope.tool_name, e),
                            i64::from(attempt),
                        ));
                    }
                    let delay = backoff_delay(attempt);
                    debug!(
                        tool = %envelope.tool_name,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "retrying after failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }

    async fn await_idempotent_twin(&self, key: &str) -> Result<ToolResult, SpineError> {
        let deadline = Instant::now() + IDEMPOTENT_WAIT;
        while Instant::now() < deadline {
            if let Ok(Some(row)) = self.ledger.get_by_idempotency(key).await {
                if row.status.is_terminal() {
                    return result_from_row(&row).ok_or_else(|| {
                        SpineError::Internal(format!(
                            "idempotent twin for '{key}' finished without a result"
                        ))
                    });
                }
            }
            tokio::time::sleep(IDEMPOTENT_POLL).await;
        }
        Err(SpineError::Internal(format!(
            "timed out waiting for idempotent twin '{key}'"
        )))
    }

    /// Record a gate refusal: audit line and metrics, no ledger row.
    fn refuse(&self, envelope: &Envelope, e: &SpineError) {
        warn!(tool = %envelope.tool_name, error = %e, "invocation refused");
        self.audit
            .record(envelope, None, 0.0, Some(e.code().as_str()));
        metrics::counter!(
            "straylight_orchestrator_requests_total",
            "tool" => envelope.tool_name.clone(),
            "status" => e.code().as_str(),
        )
        .increment(1);
    }

    fn record_metrics(&self, tool: &str, status: &'static str, started: Instant) {
        metrics::counter!(
            "straylight_orchestrator_requests_total",
            "tool" => tool.to_owned(),
            "status" => status,
        )
        .increment(1);
        metrics::histogram!(
            "straylight_orchestrator_latency_seconds",
            "tool" => tool.to_owned(),
        )
        .record(started.elapsed().as_secs_f64());
    }

    fn tools_read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<dyn Tool>>> {
        self.tools
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn tools_write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<dyn Tool>>> {
        self.tools
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Deserialize the cached result from a terminal ledger row.
fn result_from_row(row: &ExecutionRecord) -> Option<ToolResult> {
    if !row.status.is_terminal() {
        return None;
    }
    row.result
        .clone()
        .and_then(|v| serde_json::from_value(v).ok())
}

fn tool_failure(tool: &str, e: ToolError) -> SpineError {
    match e {
        ToolError::Retryable(message) => SpineError::Tool {
            tool: tool.to_owned(),
            message,
            retryable: true,
        },
        ToolError::Fatal(message) => SpineError::Tool {
            tool: tool.to_owned(),
            message,
            retryable: false,
        },
        e @ ToolError::UnknownAction { .. } => SpineError::Tool {
            tool: tool.to_owned(),
            message: e.to_string(),
            retryable: false,
        },
        ToolError::SpineViolation(v) => SpineError::SecurityViolation(v.to_string()),
    }
}

/// Exponential backoff with 0.5 s base and up to 100 ms of jitter.
fn backoff_delay(attempt: u32) -> Duration {
    let factor = 2u64.saturating_pow(attempt.min(6));
    let base_ms = 500u64.saturating_mul(factor);
    let jitter_ms = rand::thread_rng().gen_range(0..100u64);
    Duration::from_millis(base_ms.saturating_add(jitter_ms))
}

fn elapsed_ms(started: Instant) -> i64 {
    i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX)
}

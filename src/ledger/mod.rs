//! Execution ledger: the durable record of every invocation.
//!
//! The [`ExecutionLedger`] trait has two implementations: [`MemoryLedger`]
//! for tests and the sqlx-backed [`SqliteLedger`](sqlite::SqliteLedger)
//! for durability. Rows move along the status DAG
//! queued → running → {completed, failed, cancelled}; a terminal status is
//! never overwritten, enforced here rather than trusted to callers.

pub mod sqlite;

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::types::Envelope;

/// Ledger operation errors.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Underlying store failure.
    #[error("ledger store error: {0}")]
    Store(String),
    /// Row payload could not be serialized or deserialized.
    #[error("ledger serialization error: {0}")]
    Serialization(String),
    /// A row with the same idempotency key already exists.
    #[error("duplicate idempotency key: {0}")]
    DuplicateIdempotencyKey(String),
}

impl From<serde_json::Error> for LedgerError {
    fn from(e: serde_json::Error) -> Self {
        LedgerError::Serialization(e.to_string())
    }
}

/// Lifecycle state of an execution row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// Accepted and waiting for the worker.
    Queued,
    /// Currently executing inside the spine.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Cancelled before reaching a terminal execution state.
    Cancelled,
}

impl ExecutionStatus {
    /// Whether this status ends the lifecycle DAG.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Wire representation, matching the serde rename.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse the wire representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ledger row: a single invocation attempt or async lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Primary key.
    pub execution_id: String,
    /// Current lifecycle state.
    pub status: ExecutionStatus,
    /// Target tool.
    pub tool_name: String,
    /// Target domain (stringly in the row; the envelope enum is the
    /// authoritative type at the boundary).
    pub domain: String,
    /// Target action.
    pub action: String,
    /// Correlation id from the envelope.
    pub request_id: Option<String>,
    /// Replay-safety key from the envelope.
    pub idempotency_key: Option<String>,
    /// Distributed trace id.
    pub trace_id: Option<String>,
    /// Submitting caller.
    pub caller: Option<String>,
    /// Tenant routing key.
    pub tenant: Option<String>,
    /// Originating identity.
    pub source: Option<String>,
    /// Scheduling priority.
    pub priority: Option<f64>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
    /// Wall-clock execution duration.
    pub duration_ms: Option<i64>,
    /// Retry attempts consumed.
    pub retries: i64,
    /// Budget debited for this execution.
    pub cost_spent: f64,
    /// Serialized [`ToolResult`](crate::types::ToolResult).
    pub result: Option<serde_json::Value>,
    /// Failure classification, when failed.
    pub error_code: Option<String>,
    /// Failure message, when failed.
    pub error_message: Option<String>,
}

/// Insert payload for a new execution row.
#[derive(Debug, Clone)]
pub struct NewExecution {
    /// Primary key; generated when absent.
    pub execution_id: Option<String>,
    /// Initial status.
    pub status: ExecutionStatus,
    /// Target tool.
    pub tool_name: String,
    /// Target domain.
    pub domain: String,
    /// Target action.
    pub action: String,
    /// Correlation id.
    pub request_id: Option<String>,
    /// Replay-safety key.
    pub idempotency_key: Option<String>,
    /// Distributed trace id.
    pub trace_id: Option<String>,
    /// Submitting caller.
    pub caller: Option<String>,
    /// Tenant routing key.
    pub tenant: Option<String>,
    /// Originating identity.
    pub source: Option<String>,
    /// Scheduling priority.
    pub priority: Option<f64>,
}

impl NewExecution {
    /// Build an insert payload from an envelope's routing fields.
    pub fn from_envelope(envelope: &Envelope, execution_id: &str, status: ExecutionStatus) -> Self {
        Self {
            execution_id: Some(execution_id.to_owned()),
            status,
            tool_name: envelope.tool_name.clone(),
            domain: envelope.domain.to_string(),
            action: envelope.action.clone(),
            request_id: envelope.request_id.clone(),
            idempotency_key: envelope.idempotency_key.clone(),
            trace_id: envelope.trace_id.clone(),
            caller: envelope.caller.clone(),
            tenant: envelope.tenant.clone(),
            source: envelope.source.clone(),
            priority: Some(envelope.priority),
        }
    }
}

/// Typed field patch for [`ExecutionLedger::update`]. Unset fields are
/// left untouched; `updated_at` is always refreshed.
#[derive(Debug, Clone, Default)]
pub struct ExecutionUpdate {
    /// New lifecycle state. Ignored when the row is already terminal.
    pub status: Option<ExecutionStatus>,
    /// Wall-clock duration.
    pub duration_ms: Option<i64>,
    /// Retry attempts consumed.
    pub retries: Option<i64>,
    /// Budget debited.
    pub cost_spent: Option<f64>,
    /// Serialized result.
    pub result: Option<serde_json::Value>,
    /// Failure classification.
    pub error_code: Option<String>,
    /// Failure message.
    pub error_message: Option<String>,
}

impl ExecutionUpdate {
    /// A patch that only moves the lifecycle state.
    pub fn status(status: ExecutionStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

/// Durable record of execution lifecycles with idempotency lookup.
#[async_trait]
pub trait ExecutionLedger: std::fmt::Debug + Send + Sync {
    /// Insert a row, generating `execution_id` when absent. Returns the id.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::DuplicateIdempotencyKey`] when the payload
    /// carries a key that is already indexed.
    async fn create(&self, new: NewExecution) -> Result<String, LedgerError>;

    /// Apply a field patch to a row; missing rows are a no-op. Terminal
    /// statuses are never overwritten.
    async fn update(&self, execution_id: &str, patch: ExecutionUpdate) -> Result<(), LedgerError>;

    /// Fetch one row by id.
    async fn get(&self, execution_id: &str) -> Result<Option<ExecutionRecord>, LedgerError>;

    /// Fetch the row indexed under the given idempotency key.
    async fn get_by_idempotency(&self, key: &str) -> Result<Option<ExecutionRecord>, LedgerError>;

    /// The most recent rows, newest first.
    async fn list_recent(&self, limit: u32) -> Result<Vec<ExecutionRecord>, LedgerError>;
}

// ── In-memory implementation ────────────────────────────────────

#[derive(Default, Debug)]
struct MemoryState {
    rows: HashMap<String, ExecutionRecord>,
    /// Insertion order, oldest first.
    order: Vec<String>,
}

/// Non-durable ledger for tests and ephemeral deployments.
#[derive(Default, Debug)]
pub struct MemoryLedger {
    state: Mutex<MemoryState>,
}

impl MemoryLedger {
    /// Create an empty in-memory ledger.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl ExecutionLedger for MemoryLedger {
    async fn create(&self, new: NewExecution) -> Result<String, LedgerError> {
        let mut state = self.lock();
        if let Some(key) = &new.idempotency_key {
            let clash = state
                .rows
                .values()
                .any(|r| r.idempotency_key.as_deref() == Some(key.as_str()));
            if clash {
                return Err(LedgerError::DuplicateIdempotencyKey(key.clone()));
            }
        }

        let execution_id = new
            .execution_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = Utc::now();
        let record = ExecutionRecord {
            execution_id: execution_id.clone(),
            status: new.status,
            tool_name: new.tool_name,
            domain: new.domain,
            action: new.action,
            request_id: new.request_id,
            idempotency_key: new.idempotency_key,
            trace_id: new.trace_id,
            caller: new.caller,
            tenant: new.tenant,
            source: new.source,
            priority: new.priority,
            created_at: now,
            updated_at: now,
            duration_ms: None,
            retries: 0,
            cost_spent: 0.0,
            result: None,
            error_code: None,
            error_message: None,
        };
        state.order.push(execution_id.clone());
        state.rows.insert(execution_id.clone(), record);
        Ok(execution_id)
    }

    async fn update(&self, execution_id: &str, patch: ExecutionUpdate) -> Result<(), LedgerError> {
        let mut state = self.lock();
        let Some(record) = state.rows.get_mut(execution_id) else {
            return Ok(());
        };
        if let Some(status) = patch.status {
            if !record.status.is_terminal() {
                record.status = status;
            }
        }
        if let Some(v) = patch.duration_ms {
            record.duration_ms = Some(v);
        }
        if let Some(v) = patch.retries {
            record.retries = v;
        }
        if let Some(v) = patch.cost_spent {
            record.cost_spent = v;
        }
        if let Some(v) = patch.result {
            record.result = Some(v);
        }
        if let Some(v) = patch.error_code {
            record.error_code = Some(v);
        }
        if let Some(v) = patch.error_message {
            record.error_message = Some(v);
        }
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn get(&self, execution_id: &str) -> Result<Option<ExecutionRecord>, LedgerError> {
        Ok(self.lock().rows.get(execution_id).cloned())
    }

    async fn get_by_idempotency(&self, key: &str) -> Result<Option<ExecutionRecord>, LedgerError> {
        Ok(self
            .lock()
            .rows
            .values()
            .find(|r| r.idempotency_key.as_deref() == Some(key))
            .cloned())
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<ExecutionRecord>, LedgerError> {
        let state = self.lock();
        let rows = state
            .order
            .iter()
            .rev()
            .take(limit as usize)
            .filter_map(|id| state.rows.get(id).cloned())
            .collect();
        Ok(rows)
    }
}

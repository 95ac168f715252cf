//! SQLite-backed execution ledger.
//!
//! One table, `orchestrator_executions`, with routing-field indexes and a
//! partial unique index on `idempotency_key` so that parallel same-key
//! submissions resolve to a single row. Timestamps are stored as
//! fixed-width RFC 3339 text so lexicographic order matches time order.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{
    ExecutionLedger, ExecutionRecord, ExecutionStatus, ExecutionUpdate, LedgerError, NewExecution,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS orchestrator_executions (
    execution_id    TEXT PRIMARY KEY,
    status          TEXT NOT NULL,
    tool_name       TEXT NOT NULL,
    domain          TEXT NOT NULL,
    action          TEXT NOT NULL,
    request_id      TEXT,
    idempotency_key TEXT,
    trace_id        TEXT,
    caller          TEXT,
    tenant          TEXT,
    source          TEXT,
    priority        REAL,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    duration_ms     INTEGER,
    retries         INTEGER NOT NULL DEFAULT 0,
    cost_spent      REAL NOT NULL DEFAULT 0.0,
    result_json     TEXT,
    error_code      TEXT,
    error_message   TEXT
);

CREATE INDEX IF NOT EXISTS idx_exec_tool_name ON orchestrator_executions(tool_name);
CREATE INDEX IF NOT EXISTS idx_exec_domain ON orchestrator_executions(domain);
CREATE INDEX IF NOT EXISTS idx_exec_action ON orchestrator_executions(action);
CREATE INDEX IF NOT EXISTS idx_exec_request_id ON orchestrator_executions(request_id);
CREATE INDEX IF NOT EXISTS idx_exec_trace_id ON orchestrator_executions(trace_id);
CREATE INDEX IF NOT EXISTS idx_exec_caller ON orchestrator_executions(caller);
CREATE INDEX IF NOT EXISTS idx_exec_tenant ON orchestrator_executions(tenant);
CREATE INDEX IF NOT EXISTS idx_exec_source ON orchestrator_executions(source);
CREATE UNIQUE INDEX IF NOT EXISTS idx_exec_idempotency
    ON orchestrator_executions(idempotency_key)
    WHERE idempotency_key IS NOT NULL;
"#;

/// Durable ledger over a SQLite connection pool.
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl std::fmt::Debug for SqliteLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteLedger").finish()
    }
}

impl SqliteLedger {
    /// Connect to `url` (e.g. `sqlite:data/straylight.db`), creating the
    /// database file and schema as needed.
    ///
    /// # Errors
    ///
    /// Returns an error when the URL is invalid or the schema cannot be
    /// applied.
    pub async fn connect(url: &str) -> Result<Self, LedgerError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| LedgerError::Store(e.to_string()))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| LedgerError::Store(e.to_string()))?;
        let ledger = Self { pool };
        ledger.init().await?;
        Ok(ledger)
    }

    /// A private in-memory database — durable semantics without the disk,
    /// used by tests.
    ///
    /// # Errors
    ///
    /// Returns an error when the schema cannot be applied.
    pub async fn in_memory() -> Result<Self, LedgerError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| LedgerError::Store(e.to_string()))?;
        // A single connection keeps every query on the same memory DB.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| LedgerError::Store(e.to_string()))?;
        let ledger = Self { pool };
        ledger.init().await?;
        Ok(ledger)
    }

    async fn init(&self) -> Result<(), LedgerError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| LedgerError::Store(e.to_string()))?;
        Ok(())
    }
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, LedgerError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| LedgerError::Serialization(format!("bad timestamp '{raw}': {e}")))
}

fn row_to_record(row: &SqliteRow) -> Result<ExecutionRecord, LedgerError> {
    let get_err = |e: sqlx::Error| LedgerError::Store(e.to_string());

    let status_raw: String = row.try_get("status").map_err(get_err)?;
    let status = ExecutionStatus::parse(&status_raw)
        .ok_or_else(|| LedgerError::Serialization(format!("unknown status '{status_raw}'")))?;

    let created_raw: String = row.try_get("created_at").map_err(get_err)?;
    let updated_raw: String = row.try_get("updated_at").map_err(get_err)?;

    let result_raw: Option<String> = row.try_get("result_json").map_err(get_err)?;
    let result = match result_raw {
        Some(raw) => Some(serde_json::from_str(&raw)?),
        None => None,
    };

    Ok(ExecutionRecord {
        execution_id: row.try_get("execution_id").map_err(get_err)?,
        status,
        tool_name: row.try_get("tool_name").map_err(get_err)?,
        domain: row.try_get("domain").map_err(get_err)?,
        action: row.try_get("action").map_err(get_err)?,
        request_id: row.try_get("request_id").map_err(get_err)?,
        idempotency_key: row.try_get("idempotency_key").map_err(get_err)?,
        trace_id: row.try_get("trace_id").map_err(get_err)?,
        caller: row.try_get("caller").map_err(get_err)?,
        tenant: row.try_get("tenant").map_err(get_err)?,
        source: row.try_get("source").map_err(get_err)?,
        priority: row.try_get("priority").map_err(get_err)?,
        created_at: parse_ts(&created_raw)?,
        updated_at: parse_ts(&updated_raw)?,
        duration_ms: row.try_get("duration_ms").map_err(get_err)?,
        retries: row.try_get("retries").map_err(get_err)?,
        cost_spent: row.try_get("cost_spent").map_err(get_err)?,
        result,
        error_code: row.try_get("error_code").map_err(get_err)?,
        error_message: row.try_get("error_message").map_err(get_err)?,
    })
}

fn classify_insert_error(e: sqlx::Error, key: Option<&str>) -> LedgerError {
    if let sqlx::Error::Database(db) = &e {
        if db.message().contains("UNIQUE constraint failed") {
            if let Some(key) = key {
                return LedgerError::DuplicateIdempotencyKey(key.to_owned());
            }
        }
    }
    LedgerError::Store(e.to_string())
}

#[async_trait]
impl ExecutionLedger for SqliteLedger {
    async fn create(&self, new: NewExecution) -> Result<String, LedgerError> {
        let execution_id = new
            .execution_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = format_ts(Utc::now());
        sqlx::query(
            "INSERT INTO orchestrator_executions \
             (execution_id, status, tool_name, domain, action, request_id, idempotency_key, \
              trace_id, caller, tenant, source, priority, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
        )
        .bind(&execution_id)
        .bind(new.status.as_str())
        .bind(&new.tool_name)
        .bind(&new.domain)
        .bind(&new.action)
        .bind(&new.request_id)
        .bind(&new.idempotency_key)
        .bind(&new.trace_id)
        .bind(&new.caller)
        .bind(&new.tenant)
        .bind(&new.source)
        .bind(new.priority)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| classify_insert_error(e, new.idempotency_key.as_deref()))?;
        Ok(execution_id)
    }

    async fn update(&self, execution_id: &str, patch: ExecutionUpdate) -> Result<(), LedgerError> {
        let result_json = match &patch.result {
            Some(value) => Some(serde_json::to_string(value)?),
            None => None,
        };
        // The CASE guard keeps terminal rows terminal without a
        // read-modify-write race.
        sqlx::query(
            "UPDATE orchestrator_executions SET \
             status = CASE WHEN status IN ('completed','failed','cancelled') \
                           THEN status ELSE COALESCE(?1, status) END, \
             duration_ms = COALESCE(?2, duration_ms), \
             retries = COALESCE(?3, retries), \
             cost_spent = COALESCE(?4, cost_spent), \
             result_json = COALESCE(?5, result_json), \
             error_code = COALESCE(?6, error_code), \
             error_message = COALESCE(?7, error_message), \
             updated_at = ?8 \
             WHERE execution_id = ?9",
        )
        .bind(patch.status.map(ExecutionStatus::as_str))
        .bind(patch.duration_ms)
        .bind(patch.retries)
        .bind(patch.cost_spent)
        .bind(result_json)
        .bind(patch.error_code)
        .bind(patch.error_message)
        .bind(format_ts(Utc::now()))
        .bind(execution_id)
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::Store(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, execution_id: &str) -> Result<Option<ExecutionRecord>, LedgerError> {
        let row = sqlx::query("SELECT * FROM orchestrator_executions WHERE execution_id = ?1")
            .bind(execution_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| LedgerError::Store(e.to_string()))?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn get_by_idempotency(&self, key: &str) -> Result<Option<ExecutionRecord>, LedgerError> {
        let row = sqlx::query("SELECT * FROM orchestrator_executions WHERE idempotency_key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| LedgerError::Store(e.to_string()))?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<ExecutionRecord>, LedgerError> {
        let rows = sqlx::query(
            "SELECT * FROM orchestrator_executions \
             ORDER BY created_at DESC, rowid DESC LIMIT ?1",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LedgerError::Store(e.to_string()))?;
        rows.iter().map(row_to_record).collect()
    }
}

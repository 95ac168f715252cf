//! Append-only JSONL audit log for the invocation gate.
//!
//! One structured line per invocation attempt: routing fields, risk,
//! estimated vs final cost, outcome. Clients that care about
//! auditability read this file and the ledger, not HTTP bodies. Audit
//! failures are logged and swallowed — the gate never blocks on its own
//! paper trail.

use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use serde::Serialize;
use tracing::warn;

use crate::types::{Envelope, ToolResult};

/// One audit line.
#[derive(Debug, Serialize)]
struct AuditEntry<'a> {
    ts: String,
    tool: &'a str,
    domain: String,
    action: &'a str,
    caller: Option<&'a str>,
    tenant: Option<&'a str>,
    source: Option<&'a str>,
    risk_level: String,
    estimated_cost: f64,
    final_cost: f64,
    success: bool,
    error: Option<&'a str>,
    reason: Option<&'a str>,
}

/// Audit logger writing JSON lines to an append-only sink.
pub struct AuditLog {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog").finish()
    }
}

impl AuditLog {
    /// Open (or create) the audit file at `path` in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            writer: Mutex::new(Box::new(file)),
        })
    }

    /// Build an audit log over an arbitrary writer (for testing).
    pub fn from_writer(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Record one invocation attempt. `final_cost` is what the economy
    /// debited; `error` is set for refusals and failures.
    pub fn record(
        &self,
        envelope: &Envelope,
        result: Option<&ToolResult>,
        final_cost: f64,
        error: Option<&str>,
    ) {
        let reason = envelope
            .context
            .get("reason")
            .and_then(|v| v.as_str());
        let entry = AuditEntry {
            ts: Utc::now().to_rfc3339(),
            tool: &envelope.tool_name,
            domain: envelope.domain.to_string(),
            action: &envelope.action,
            caller: envelope.caller.as_deref(),
            tenant: envelope.tenant.as_deref(),
            source: envelope.source.as_deref(),
            risk_level: envelope.risk_level.to_string(),
            estimated_cost: envelope.estimated_cost,
            final_cost,
            success: result.is_some_and(|r| r.success),
            error,
            reason,
        };
        if let Err(e) = self.write_entry(&entry) {
            warn!(error = %e, tool = %envelope.tool_name, "audit write failed");
        }
    }

    fn write_entry(&self, entry: &AuditEntry<'_>) -> anyhow::Result<()> {
        let line = serde_json::to_string(entry)?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|e| anyhow::anyhow!("audit lock poisoned: {e}"))?;
        writeln!(writer, "{line}")?;
        writer.flush()?;
        Ok(())
    }
}

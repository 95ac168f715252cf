//! Explainability: every autonomy decision leaves a trace.
//!
//! One JSON file holds the latest decision — observation, verdict,
//! result — overwritten each cycle. The HTTP surface serves it raw; the
//! CLI renders it as a short narrative.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::observer::SignalBundle;

use super::intents::Intent;

/// The decision half of an explain record.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionExplain {
    /// "act", "idle", or "reject".
    pub action: String,
    /// The decider's reason phrase.
    pub reason: String,
    /// The intent the decision was about, if any.
    pub intent: Option<Intent>,
}

/// One full explainability record.
#[derive(Debug, Serialize)]
pub struct ExplainRecord {
    /// When the decision was made.
    pub time: DateTime<Utc>,
    /// The decision taken.
    pub decision: DecisionExplain,
    /// The observation that informed it.
    pub observation: Option<SignalBundle>,
    /// Outcome of the cycle (tool result, idle stats, or refusal marker).
    pub result: serde_json::Value,
    /// Reflector's score of the outcome, present on acted cycles.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<serde_json::Value>,
}

/// Writer for the latest-explanation file.
#[derive(Debug)]
pub struct ExplainLog {
    path: PathBuf,
}

impl ExplainLog {
    /// Create a log writing to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Overwrite the file with this record. Failures are logged, never
    /// propagated — explainability must not break the loop it explains.
    pub fn write(&self, record: &ExplainRecord) {
        let write = || -> anyhow::Result<()> {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            std::fs::write(&self.path, serde_json::to_string_pretty(record)?)?;
            Ok(())
        };
        if let Err(e) = write() {
            warn!(path = %self.path.display(), error = %e, "failed to write explanation");
        }
    }

    /// Path of the explanation file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read the latest explanation as raw JSON, if present.
pub fn read_latest(path: impl AsRef<Path>) -> Option<serde_json::Value> {
    let contents = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&contents).ok()
}

/// Render an explanation as a short first-person narrative for the CLI.
pub fn format_narrative(data: Option<&serde_json::Value>) -> String {
    let Some(data) = data else {
        return "No explanation available (I haven't acted yet).".to_owned();
    };

    let time = data
        .get("time")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown time");
    let decision = data.get("decision").cloned().unwrap_or_default();
    let action = decision
        .get("action")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_uppercase();
    let reason = decision
        .get("reason")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown");

    let mut narrative = format!("[{time}] I decided to {action} because {reason}.\n");

    if let Some(intent) = decision.get("intent").filter(|v| !v.is_null()) {
        let description = intent
            .get("description")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        let intent_type = intent
            .get("intent_type")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        let priority = intent
            .get("priority")
            .and_then(serde_json::Value::as_f64)
            .unwrap_or(0.0);
        let source = intent
            .get("source")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        narrative.push_str(&format!("My intent was: {description}\n"));
        narrative.push_str(&format!("  (type: {intent_type}, priority: {priority:.2})\n"));
        narrative.push_str(&format!("  (source: {source})\n"));
    }

    if let Some(observation) = data.get("observation").filter(|v| !v.is_null()) {
        let pain = observation
            .get("pain_score")
            .and_then(serde_json::Value::as_f64)
            .unwrap_or(0.0);
        let recent = observation
            .get("recent_actions")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0);
        narrative.push_str("\nContext:\n");
        narrative.push_str(&format!("  - pain score: {pain:.2}\n"));
        narrative.push_str(&format!("  - recent actions: {recent}\n"));
    }

    if let Some(result) = data.get("result").filter(|v| !v.is_null()) {
        narrative.push_str(&format!("\nOutcome:\n  {result}\n"));
    }

    narrative
}

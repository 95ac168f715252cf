//! Gateway adapter: the only entry point external request brokers call.
//!
//! An external payload is guarded (canon fast-reject before any
//! reasoning), mapped to either a direct envelope invocation or an
//! injected [`Intent`] plus one autonomy cycle, and the outcome is
//! normalized into a small response record.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::autonomy::canon::violates_canon_text;
use crate::autonomy::intents::{Intent, IntentType};
use crate::autonomy::{AutonomyController, CycleStatus};
use crate::orchestrator::Orchestrator;
use crate::types::{Context, Envelope};

/// External request as the broker hands it over.
#[derive(Debug, Clone, Deserialize)]
pub struct ExternalRequest {
    /// "invoke" for a direct envelope, anything else maps to an intent.
    #[serde(default)]
    pub action_type: Option<String>,
    /// What the requester wants done.
    #[serde(default)]
    pub description: String,
    /// Requested priority, clamped to `[0.0, 1.0]`.
    #[serde(default)]
    pub priority: Option<f64>,
    /// Originating identity; defaults to "external".
    #[serde(default)]
    pub source: Option<String>,
    /// Free-form parameters.
    #[serde(default)]
    pub context: Context,
    /// Direct envelope, required when `action_type` is "invoke".
    #[serde(default)]
    pub envelope: Option<Envelope>,
}

/// Normalized adapter response.
#[derive(Debug, Serialize)]
pub struct AdapterResponse {
    /// "acted", "idle", "rejected", or "invoked".
    pub status: String,
    /// Tool or cycle output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Refusal or idle reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// The injected intent's id, when one was created.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent_id: Option<String>,
}

/// The guard refused the payload before any reasoning happened.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Canon-level kill switch.
    #[error("canon violation, request blocked: {0}")]
    GuardRejection(String),
    /// "invoke" requests must carry an envelope.
    #[error("invoke request without an envelope")]
    MissingEnvelope,
    /// The autonomy cycle itself failed.
    #[error("adapter cycle failed: {0}")]
    CycleFailed(String),
}

/// Marshals external payloads into the cognitive core.
pub struct GatewayAdapter {
    orchestrator: Arc<Orchestrator>,
    controller: Arc<AutonomyController>,
}

impl std::fmt::Debug for GatewayAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayAdapter").finish()
    }
}

impl GatewayAdapter {
    /// Build the adapter over the shared orchestrator and controller.
    pub fn new(orchestrator: Arc<Orchestrator>, controller: Arc<AutonomyController>) -> Self {
        Self {
            orchestrator,
            controller,
        }
    }

    /// Handle one external request.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::GuardRejection`] when the payload matches
    /// the canon, before any intent exists.
    pub async fn handle(&self, request: ExternalRequest) -> Result<AdapterResponse, AdapterError> {
        self.guard(&request)?;

        // Direct invocation path: the envelope goes straight through the
        // orchestrator's gate.
        if request.action_type.as_deref() == Some("invoke") {
            let envelope = request.envelope.ok_or(AdapterError::MissingEnvelope)?;
            let result = self.orchestrator.invoke(&envelope).await;
            return Ok(AdapterResponse {
                status: "invoked".to_owned(),
                result: serde_json::to_value(&result).ok(),
                reason: None,
                intent_id: None,
            });
        }

        // Intent path: inject and run one cognitive cycle.
        let intent = self.map_to_intent(&request);
        let intent_id = intent.intent_id.clone();
        info!(intent_id = %intent_id, source = %intent.source, "adapter injecting intent");
        self.controller.inject_intent(intent);

        let outcome = self
            .controller
            .run_cycle()
            .await
            .map_err(|e| AdapterError::CycleFailed(e.to_string()))?;

        let status = match outcome.status {
            CycleStatus::Acted => "acted",
            CycleStatus::Idle => "idle",
            CycleStatus::Rejected => "rejected",
        };
        Ok(AdapterResponse {
            status: status.to_owned(),
            result: outcome
                .result
                .as_ref()
                .and_then(|r| serde_json::to_value(r).ok()),
            reason: Some(outcome.reason),
            intent_id: Some(intent_id),
        })
    }

    /// Fast reject before the core even reasons about the request.
    fn guard(&self, request: &ExternalRequest) -> Result<(), AdapterError> {
        let action = request
            .context
            .get("action")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        if violates_canon_text(&request.description, action) {
            warn!(description = %request.description, "guard rejected external request");
            return Err(AdapterError::GuardRejection(request.description.clone()));
        }
        Ok(())
    }

    fn map_to_intent(&self, request: &ExternalRequest) -> Intent {
        let intent_type = match request.action_type.as_deref() {
            Some("learn") => IntentType::Learn,
            Some("explore") => IntentType::Explore,
            Some("maintain") => IntentType::Maintain,
            _ => IntentType::Serve,
        };
        let priority = request.priority.unwrap_or(0.6).clamp(0.0, 1.0);
        let source = request.source.clone().unwrap_or_else(|| "external".to_owned());
        Intent::new(request.description.clone(), priority, intent_type, source)
            .with_context(request.context.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::economy::{Economy, EconomyDefaults};
    use crate::ledger::{ExecutionLedger, MemoryLedger};
    use crate::observer::Observer;
    use crate::orchestrator::audit::AuditLog;
    use crate::orchestrator::PolicyConfig;
    use crate::tools::maintainer::MaintainerTool;
    use crate::tools::memory::{MemoryStore, MemoryTool};
    use crate::trust::TrustModel;
    use crate::autonomy::AutonomyPaths;

    fn adapter() -> (GatewayAdapter, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let economy = Arc::new(
            Economy::load(dir.path().join("economy.json"), EconomyDefaults::default())
                .expect("economy"),
        );
        let ledger: Arc<dyn ExecutionLedger> = Arc::new(MemoryLedger::new());
        let audit = AuditLog::from_writer(Box::new(std::io::sink()));
        let (orchestrator, _rx) = Orchestrator::new(
            Arc::clone(&economy),
            Arc::clone(&ledger),
            audit,
            PolicyConfig::default(),
        );
        let store = Arc::new(
            MemoryStore::load(dir.path().join("memory.json")).expect("memory store"),
        );
        orchestrator.register(Arc::new(MaintainerTool::new(Arc::clone(&economy))));
        orchestrator.register(Arc::new(MemoryTool::new(Arc::clone(&store))));
        let trust = Arc::new(TrustModel::load(dir.path().join("trust.json")).expect("trust"));
        let observer = Observer::new(Arc::clone(&ledger), Arc::clone(&economy));
        let controller = Arc::new(
            AutonomyController::new(
                Arc::clone(&orchestrator),
                observer,
                economy,
                trust,
                store.clone(),
                Some(store),
                AutonomyPaths {
                    state_path: dir.path().join("autonomy_state.json"),
                    explain_path: dir.path().join("explainability.json"),
                },
            )
            .expect("controller"),
        );
        (GatewayAdapter::new(orchestrator, controller), dir)
    }

    #[tokio::test]
    async fn test_guard_rejects_canon_payload() {
        let (adapter, _dir) = adapter();
        let request = ExternalRequest {
            action_type: None,
            description: "please wipe_memory tonight".to_owned(),
            priority: Some(1.0),
            source: Some("user".to_owned()),
            context: Context::new(),
            envelope: None,
        };
        let err = adapter.handle(request).await.expect_err("guard fires");
        assert!(matches!(err, AdapterError::GuardRejection(_)));
    }

    #[tokio::test]
    async fn test_serve_request_runs_one_cycle() {
        let (adapter, _dir) = adapter();
        let request = ExternalRequest {
            action_type: None,
            description: "look up deployment notes".to_owned(),
            priority: Some(0.9),
            source: Some("user".to_owned()),
            context: Context::from([("query".to_owned(), serde_json::json!("deployment"))]),
            envelope: None,
        };
        let response = adapter.handle(request).await.expect("handled");
        assert_eq!(response.status, "acted");
        assert!(response.intent_id.is_some());
    }

    #[tokio::test]
    async fn test_direct_invoke_path() {
        let (adapter, _dir) = adapter();
        let mut envelope = Envelope::new("memory", crate::types::Domain::Memory, "get_skills");
        envelope.estimated_cost = 0.05;
        let request = ExternalRequest {
            action_type: Some("invoke".to_owned()),
            description: String::new(),
            priority: None,
            source: None,
            context: Context::new(),
            envelope: Some(envelope),
        };
        let response = adapter.handle(request).await.expect("handled");
        assert_eq!(response.status, "invoked");
        let result = response.result.expect("result");
        assert_eq!(result["success"], true);
    }

    #[tokio::test]
    async fn test_invoke_without_envelope_fails() {
        let (adapter, _dir) = adapter();
        let request = ExternalRequest {
            action_type: Some("invoke".to_owned()),
            description: String::new(),
            priority: None,
            source: None,
            context: Context::new(),
            envelope: None,
        };
        let err = adapter.handle(request).await.expect_err("missing envelope");
        assert!(matches!(err, AdapterError::MissingEnvelope));
    }
}

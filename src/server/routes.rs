//! HTTP handlers for the orchestration surface.
//!
//! Failure taxonomy maps to status codes: 402 budget, 403 security,
//! 400 tool error, 500 internal. Clients that care about auditability
//! read the ledger and audit log, not these response bodies.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Deserialize;
use uuid::Uuid;

use crate::autonomy::explain;
use crate::orchestrator::EnqueueError;
use crate::types::{Envelope, ErrorCode, ToolResult};

use super::auth::{forbidden, Scopes};
use super::ServerState;

/// Query parameters for the timeline endpoint.
#[derive(Debug, Deserialize)]
pub struct TimelineParams {
    /// Maximum rows to return (default 50).
    pub limit: Option<u32>,
}

fn not_found(detail: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "detail": detail })),
    )
        .into_response()
}

/// Enforce the TLS policy using the forwarded protocol header.
fn require_tls(state: &ServerState, headers: &HeaderMap) -> Result<(), Response> {
    if !state.require_tls {
        return Ok(());
    }
    let proto = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    if proto != "https" {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "detail": "TLS required" })),
        )
            .into_response());
    }
    Ok(())
}

/// Fill routing fields from headers when the envelope leaves them unset.
fn normalize_envelope(headers: &HeaderMap, mut envelope: Envelope) -> Envelope {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    };
    if envelope.request_id.is_none() {
        envelope.request_id =
            Some(header("x-request-id").unwrap_or_else(|| Uuid::new_v4().to_string()));
    }
    if envelope.trace_id.is_none() {
        envelope.trace_id = header("x-trace-id").or_else(|| envelope.request_id.clone());
    }
    if envelope.caller.is_none() {
        envelope.caller = Some(header("x-caller").unwrap_or_else(|| "api".to_owned()));
    }
    if envelope.tenant.is_none() {
        envelope.tenant = header("x-tenant");
    }
    if envelope.source.is_none() {
        envelope.source = Some("api".to_owned());
    }
    envelope
}

/// Map a finished result to its HTTP status.
fn result_response(result: ToolResult) -> Response {
    if result.success {
        return Json(result).into_response();
    }
    let status = match result.error_code {
        Some(ErrorCode::BudgetExceeded) => StatusCode::PAYMENT_REQUIRED,
        Some(ErrorCode::SecurityViolation) => StatusCode::FORBIDDEN,
        Some(ErrorCode::ToolError) => StatusCode::BAD_REQUEST,
        Some(ErrorCode::InternalError) | None => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(result)).into_response()
}

/// POST `/v1/tools/execute` and `/v1/orchestrator/execute`: sync invoke.
pub async fn execute(
    State(state): State<Arc<ServerState>>,
    Extension(scopes): Extension<Scopes>,
    headers: HeaderMap,
    Json(envelope): Json<Envelope>,
) -> Response {
    if let Err(response) = require_tls(&state, &headers) {
        return response;
    }
    if !scopes.allows_envelope(&envelope) {
        return forbidden("insufficient scope");
    }
    let envelope = normalize_envelope(&headers, envelope);
    let result = state.orchestrator.invoke(&envelope).await;
    result_response(result)
}

/// POST `/v1/orchestrator/execute:batch`: independent parallel array.
pub async fn execute_batch(
    State(state): State<Arc<ServerState>>,
    Extension(scopes): Extension<Scopes>,
    headers: HeaderMap,
    Json(envelopes): Json<Vec<Envelope>>,
) -> Response {
    if let Err(response) = require_tls(&state, &headers) {
        return response;
    }
    let mut normalized = Vec::with_capacity(envelopes.len());
    for envelope in envelopes {
        if !scopes.allows_envelope(&envelope) {
            return forbidden("insufficient scope");
        }
        normalized.push(normalize_envelope(&headers, envelope));
    }

    // Each entry runs independently; order is preserved.
    let handles: Vec<_> = normalized
        .into_iter()
        .map(|envelope| {
            let orchestrator = Arc::clone(&state.orchestrator);
            tokio::spawn(async move { orchestrator.invoke(&envelope).await })
        })
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(result) => results.push(result),
            Err(e) => results.push(ToolResult::error(
                ErrorCode::InternalError,
                e.to_string(),
                true,
            )),
        }
    }
    Json(serde_json::json!({ "results": results })).into_response()
}

/// POST `/v1/orchestrator/execute:async`: enqueue and return immediately.
pub async fn execute_async(
    State(state): State<Arc<ServerState>>,
    Extension(scopes): Extension<Scopes>,
    headers: HeaderMap,
    Json(envelope): Json<Envelope>,
) -> Response {
    if let Err(response) = require_tls(&state, &headers) {
        return response;
    }
    if !scopes.allows_envelope(&envelope) {
        return forbidden("insufficient scope");
    }
    let envelope = normalize_envelope(&headers, envelope);
    match state.orchestrator.enqueue(&envelope).await {
        Ok((execution_id, status)) => Json(serde_json::json!({
            "execution_id": execution_id,
            "status": status,
        }))
        .into_response(),
        Err(EnqueueError::QueueFull(_)) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "detail": "async queue full" })),
        )
            .into_response(),
        Err(EnqueueError::Spine(e)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "detail": e.to_string() })),
        )
            .into_response(),
    }
}

/// GET `/v1/orchestrator/executions/{id}`: one ledger row.
pub async fn execution_status(
    State(state): State<Arc<ServerState>>,
    Extension(scopes): Extension<Scopes>,
    Path(execution_id): Path<String>,
) -> Response {
    if !scopes.allows("orchestrator:read") {
        return forbidden("insufficient scope");
    }
    match state.orchestrator.ledger().get(&execution_id).await {
        Ok(Some(record)) => Json(record).into_response(),
        Ok(None) => not_found("execution not found"),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "detail": e.to_string() })),
        )
            .into_response(),
    }
}

/// POST `/v1/orchestrator/executions/{id}/cancel`.
pub async fn cancel_execution(
    State(state): State<Arc<ServerState>>,
    Extension(scopes): Extension<Scopes>,
    Path(execution_id): Path<String>,
) -> Response {
    if !scopes.allows("orchestrator:write") {
        return forbidden("insufficient scope");
    }
    match state.orchestrator.cancel(&execution_id).await {
        Ok(Some(status)) => Json(serde_json::json!({
            "execution_id": execution_id,
            "status": status,
        }))
        .into_response(),
        Ok(None) => not_found("execution not found"),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "detail": e.to_string() })),
        )
            .into_response(),
    }
}

/// GET `/v1/orchestrator/timeline?limit=N`: recent rows, newest first.
pub async fn timeline(
    State(state): State<Arc<ServerState>>,
    Extension(scopes): Extension<Scopes>,
    Query(params): Query<TimelineParams>,
) -> Response {
    if !scopes.allows("orchestrator:read") {
        return forbidden("insufficient scope");
    }
    let limit = params.limit.unwrap_or(50);
    match state.orchestrator.ledger().list_recent(limit).await {
        Ok(executions) => Json(serde_json::json!({ "executions": executions })).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "detail": e.to_string() })),
        )
            .into_response(),
    }
}

/// GET `/v1/orchestrator/budget`: economy snapshot.
pub async fn budget(
    State(state): State<Arc<ServerState>>,
    Extension(scopes): Extension<Scopes>,
) -> Response {
    if !scopes.allows("economy:read") {
        return forbidden("insufficient scope");
    }
    let snapshot = state.orchestrator.budget_snapshot();
    Json(serde_json::json!({ "budget": snapshot })).into_response()
}

/// GET `/v1/orchestrator/explain/latest`: most recent autonomy decision.
pub async fn explain_latest(
    State(state): State<Arc<ServerState>>,
    Extension(scopes): Extension<Scopes>,
) -> Response {
    if !scopes.allows("orchestrator:read") {
        return forbidden("insufficient scope");
    }
    match explain::read_latest(&state.explain_path) {
        Some(value) => Json(value).into_response(),
        None => not_found("no explainability data"),
    }
}

/// GET `/v1/orchestrator/explain/{id}`: the ledger row behind a decision.
pub async fn explain_execution(
    state: State<Arc<ServerState>>,
    scopes: Extension<Scopes>,
    execution_id: Path<String>,
) -> Response {
    execution_status(state, scopes, execution_id).await
}

/// GET `/healthz`: liveness.
pub async fn healthz() -> Response {
    Json(serde_json::json!({ "status": "ok" })).into_response()
}

/// GET `/readyz`: readiness plus the registered tool set.
pub async fn readyz(State(state): State<Arc<ServerState>>) -> Response {
    Json(serde_json::json!({
        "status": "ready",
        "tools_loaded": state.orchestrator.tool_names(),
    }))
    .into_response()
}

/// GET `/metrics`: Prometheus text format.
pub async fn metrics(State(state): State<Arc<ServerState>>) -> Response {
    state.prometheus.render().into_response()
}

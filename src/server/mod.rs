//! Authenticated HTTP surface over the orchestrator.
//!
//! All orchestration endpoints live under `/v1` behind bearer-token
//! authentication; `/healthz`, `/readyz`, and `/metrics` are public.
//! Every response carries an `x-request-id` header, echoed from the
//! request or generated.

pub mod auth;
pub mod routes;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::orchestrator::Orchestrator;

/// Shared state behind every handler.
pub struct ServerState {
    /// The invocation gate.
    pub orchestrator: Arc<Orchestrator>,
    /// Latest-explanation file served at `/v1/orchestrator/explain/latest`.
    pub explain_path: PathBuf,
    /// Token → scope list map.
    pub tokens: HashMap<String, Vec<String>>,
    /// Refuse plaintext requests (checks `x-forwarded-proto`).
    pub require_tls: bool,
    /// Prometheus render handle for `/metrics`.
    pub prometheus: PrometheusHandle,
}

impl std::fmt::Debug for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerState")
            .field("require_tls", &self.require_tls)
            .finish()
    }
}

static PROMETHEUS: OnceLock<PrometheusHandle> = OnceLock::new();

/// The process-wide Prometheus handle. The `metrics` facade has exactly
/// one global recorder, so installation happens once; later callers get
/// the same handle.
pub fn prometheus_handle() -> PrometheusHandle {
    PROMETHEUS
        .get_or_init(|| {
            PrometheusBuilder::new().install_recorder().unwrap_or_else(|e| {
                warn!(error = %e, "metrics recorder already installed, using detached handle");
                PrometheusBuilder::new().build_recorder().handle()
            })
        })
        .clone()
}

/// Assemble the full router over the given state.
pub fn build_router(state: Arc<ServerState>) -> Router {
    let api = Router::new()
        .route("/tools/execute", post(routes::execute))
        .route("/orchestrator/execute", post(routes::execute))
        .route("/orchestrator/execute:batch", post(routes::execute_batch))
        .route("/orchestrator/execute:async", post(routes::execute_async))
        .route(
            "/orchestrator/executions/{execution_id}",
            get(routes::execution_status),
        )
        .route(
            "/orchestrator/executions/{execution_id}/cancel",
            post(routes::cancel_execution),
        )
        .route("/orchestrator/timeline", get(routes::timeline))
        .route("/orchestrator/budget", get(routes::budget))
        .route("/orchestrator/explain/latest", get(routes::explain_latest))
        .route(
            "/orchestrator/explain/{execution_id}",
            get(routes::explain_execution),
        )
        .layer(axum::middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::authenticate,
        ));

    Router::new()
        .nest("/v1", api)
        .route("/healthz", get(routes::healthz))
        .route("/readyz", get(routes::readyz))
        .route("/metrics", get(routes::metrics))
        .layer(axum::middleware::from_fn(propagate_request_id))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the process exits.
///
/// # Errors
///
/// Returns an error when the listener cannot bind or the server fails.
pub async fn serve(state: Arc<ServerState>, bind: &str) -> anyhow::Result<()> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(bind, "http surface listening");
    axum::serve(listener, router).await?;
    Ok(())
}

/// Echo or generate `x-request-id` on every response.
async fn propagate_request_id(request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

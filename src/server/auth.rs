//! Bearer-token authentication and scope checks.
//!
//! Tokens map to scope lists. `*` and `orchestrator:admin` grant
//! everything; an invocation needs any of `{domain}:*`,
//! `{domain}:{action}`, or the admin scope; read/write endpoints need
//! `orchestrator:read`/`orchestrator:write`.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::types::Envelope;

use super::ServerState;

/// Scopes granted to the authenticated token, stored in request
/// extensions by [`authenticate`].
#[derive(Debug, Clone)]
pub struct Scopes(pub Vec<String>);

impl Scopes {
    fn has(&self, scope: &str) -> bool {
        self.0.iter().any(|s| s == scope)
    }

    /// Whether the token may submit this envelope.
    pub fn allows_envelope(&self, envelope: &Envelope) -> bool {
        if self.has("*") || self.has("orchestrator:admin") {
            return true;
        }
        let domain = envelope.domain.to_string();
        self.has(&format!("{domain}:*")) || self.has(&format!("{domain}:{}", envelope.action))
    }

    /// Whether the token carries the named scope (or a wildcard).
    pub fn allows(&self, required: &str) -> bool {
        self.has("*") || self.has("orchestrator:admin") || self.has(required)
    }
}

/// A 403 with a small JSON body, matching the surface's error shape.
pub fn forbidden(detail: &str) -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(serde_json::json!({ "detail": detail })),
    )
        .into_response()
}

/// Middleware enforcing bearer-token authentication for the `/v1` tree.
///
/// On success the token's scopes are inserted into request extensions;
/// handlers read them via `Extension<Scopes>`.
pub async fn authenticate(
    State(state): State<Arc<ServerState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let Some(token) = token else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "detail": "missing bearer token" })),
        )
            .into_response();
    };

    let Some(scopes) = state.tokens.get(token) else {
        tracing::warn!("authentication failed: unknown token");
        return forbidden("invalid API key");
    };

    request.extensions_mut().insert(Scopes(scopes.clone()));
    next.run(request).await
}

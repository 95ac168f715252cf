//! Spine guard: the invariant that every side effect flows through the
//! orchestrator.
//!
//! The orchestrator wraps tool execution in [`enter`], which sets a
//! task-local flag. Tool bodies call [`verify`] before doing anything;
//! outside the scope the call fails, so a tool invoked directly — or a
//! tool calling another tool's `execute` — is refused as a security
//! violation.

use thiserror::Error;

tokio::task_local! {
    static SPINE_ACTIVE: bool;
}

/// Execution attempted outside the orchestrator spine.
#[derive(Debug, Error)]
#[error("tool execution bypassed the orchestrator spine")]
pub struct SpineViolation;

/// Run `fut` inside the spine scope. Only the orchestrator calls this.
pub async fn enter<F>(fut: F) -> F::Output
where
    F: std::future::Future,
{
    SPINE_ACTIVE.scope(true, fut).await
}

/// Assert the current task is executing inside the spine.
///
/// # Errors
///
/// Returns [`SpineViolation`] when called outside [`enter`].
pub fn verify() -> Result<(), SpineViolation> {
    let active = SPINE_ACTIVE.try_with(|v| *v).unwrap_or(false);
    if active {
        Ok(())
    } else {
        Err(SpineViolation)
    }
}

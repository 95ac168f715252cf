//! Capability surface: the [`Tool`] trait and the built-in tools.
//!
//! A tool is addressable by a `(tool_name, domain, action)` triple and
//! receives only the validated [`Envelope`]. Tool bodies must call
//! [`spine::verify`](crate::orchestrator::spine::verify) before doing any
//! work; the orchestrator is the only component that opens the spine
//! scope.

pub mod maintainer;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::orchestrator::spine::SpineViolation;
use crate::types::{Domain, Envelope, ToolResult};

/// Failure signalled by a tool body.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The tool failed in a way that may succeed on retry.
    #[error("{0}")]
    Retryable(String),
    /// The tool failed permanently for this envelope.
    #[error("{0}")]
    Fatal(String),
    /// The envelope named an action the tool does not implement.
    #[error("unknown action '{action}' for tool '{tool}'")]
    UnknownAction {
        /// Tool that rejected the action.
        tool: String,
        /// The unknown action.
        action: String,
    },
    /// Execution attempted outside the orchestrator spine.
    #[error(transparent)]
    SpineViolation(#[from] SpineViolation),
}

/// A registered capability.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool identifier.
    fn name(&self) -> &str;

    /// Owning domain.
    fn domain(&self) -> Domain;

    /// Pre-execution cost estimate; the orchestrator debits this when the
    /// result does not report an actual cost.
    fn estimate_cost(&self, envelope: &Envelope) -> f64;

    /// Execute the tool body. Implementations call
    /// `spine::verify()?` first.
    ///
    /// # Errors
    ///
    /// Returns a [`ToolError`] on failure; the orchestrator converts it
    /// into the error taxonomy and a failed ledger row.
    async fn execute(&self, envelope: &Envelope) -> Result<ToolResult, ToolError>;
}

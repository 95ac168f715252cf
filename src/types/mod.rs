//! Core invocation types shared by every subsystem.
//!
//! The [`Envelope`] is the immutable input record for a single tool
//! invocation; the [`ToolResult`] is the standardized outcome. Both cross
//! the HTTP boundary verbatim, so every field is serde-mapped and optional
//! routing fields default cleanly.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Logical capability grouping, subject to allow/deny policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    /// Episodic/semantic memory operations.
    Memory,
    /// Embodied side effects (shell, actuators).
    Body,
    /// Self-modification and patch generation.
    Evolution,
    /// Internal reasoning and upkeep.
    Cognition,
    /// Budget and value operations.
    Economy,
    /// Peer and trust operations.
    Social,
    /// Dry-run sandboxes.
    Simulation,
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => f.write_str("memory"),
            Self::Body => f.write_str("body"),
            Self::Evolution => f.write_str("evolution"),
            Self::Cognition => f.write_str("cognition"),
            Self::Economy => f.write_str("economy"),
            Self::Social => f.write_str("social"),
            Self::Simulation => f.write_str("simulation"),
        }
    }
}

/// Risk assessment of an action, ordered lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Read-only or reversible.
    Low,
    /// Side effects with rollback.
    Medium,
    /// Irreversible or externally visible.
    High,
}

impl Default for RiskLevel {
    fn default() -> Self {
        Self::Low
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => f.write_str("low"),
            Self::Medium => f.write_str("medium"),
            Self::High => f.write_str("high"),
        }
    }
}

impl std::str::FromStr for RiskLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(anyhow::anyhow!("unknown risk level: {other}")),
        }
    }
}

/// Free-form per-call parameters carried by an envelope.
///
/// A sorted map keeps serialized envelopes byte-stable, which matters for
/// audit diffing.
pub type Context = BTreeMap<String, serde_json::Value>;

/// Immutable input record describing a single tool invocation request.
///
/// Every capability invocation in the system — HTTP, autonomy loop, or
/// queue worker — is expressed as one of these and submitted through the
/// orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Identifier of a registered capability (e.g. "memory").
    pub tool_name: String,
    /// Owning domain, checked against allow/deny policy.
    pub domain: Domain,
    /// The specific operation within the tool (e.g. "retrieve").
    pub action: String,
    /// Contextual metadata: per-call parameters, `max_retries`,
    /// `emergency`, `reason`.
    #[serde(default)]
    pub context: Context,
    /// Risk assessment of the action.
    #[serde(default)]
    pub risk_level: RiskLevel,
    /// Advisory cost estimate; the tool may compute its own.
    #[serde(default)]
    pub estimated_cost: f64,
    /// Replay-safety key: a prior successful result with the same key
    /// within TTL is returned verbatim.
    #[serde(default)]
    pub idempotency_key: Option<String>,
    /// Correlation id, normally supplied by the caller or derived from
    /// the `x-request-id` header.
    #[serde(default)]
    pub request_id: Option<String>,
    /// Distributed trace id.
    #[serde(default)]
    pub trace_id: Option<String>,
    /// Who submitted the call (e.g. "api", "autonomy").
    #[serde(default)]
    pub caller: Option<String>,
    /// Multi-tenant routing key, subject to per-tenant ceilings.
    #[serde(default)]
    pub tenant: Option<String>,
    /// Originating identity, checked against the trust model when the
    /// call comes from an intent.
    #[serde(default)]
    pub source: Option<String>,
    /// Scheduling priority in `[0.0, 1.0]`; high priority can bypass
    /// throttling and debt gates.
    #[serde(default)]
    pub priority: f64,
    /// Per-call execution deadline; falls back to the policy default.
    #[serde(default)]
    pub deadline_ms: Option<u64>,
    /// Policy hint: the action requires an explicit validation step.
    #[serde(default)]
    pub requires_validation: bool,
    /// Policy hint: the action must support rollback.
    #[serde(default)]
    pub rollback_allowed: bool,
}

impl Envelope {
    /// Build a minimal envelope for the given capability triple.
    ///
    /// Routing fields start unset; use struct update syntax for the rest.
    pub fn new(tool_name: impl Into<String>, domain: Domain, action: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            domain,
            action: action.into(),
            context: Context::new(),
            risk_level: RiskLevel::Low,
            estimated_cost: 0.0,
            idempotency_key: None,
            request_id: None,
            trace_id: None,
            caller: None,
            tenant: None,
            source: None,
            priority: 0.0,
            deadline_ms: None,
            requires_validation: false,
            rollback_allowed: false,
        }
    }

    /// Read `context.max_retries` as a retry budget (default 0).
    pub fn max_retries(&self) -> u32 {
        self.context
            .get("max_retries")
            .and_then(serde_json::Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(0)
    }

    /// Whether `context.emergency` is set — emergency calls bypass the
    /// hard budget stop.
    pub fn is_emergency(&self) -> bool {
        self.context
            .get("emergency")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }
}

/// Machine-readable failure classification returned in [`ToolResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The called tool signalled failure or timed out.
    ToolError,
    /// The economy refused the call.
    BudgetExceeded,
    /// Authorization failed; never retryable.
    SecurityViolation,
    /// Unexpected failure inside the orchestrator itself.
    InternalError,
}

impl ErrorCode {
    /// Wire representation, matching the serde rename.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ToolError => "tool_error",
            Self::BudgetExceeded => "budget_exceeded",
            Self::SecurityViolation => "security_violation",
            Self::InternalError => "internal_error",
        }
    }
}

/// Standardized result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the invocation succeeded.
    pub success: bool,
    /// Free-form tool output.
    #[serde(default)]
    pub output: Option<serde_json::Value>,
    /// Actual cost debited; `0.0` means the orchestrator debits the
    /// estimate instead.
    #[serde(default)]
    pub cost_spent: f64,
    /// Whether the invocation left an auditable memory trace. Forced to
    /// `true` by the orchestrator on success.
    #[serde(default)]
    pub memory_written: bool,
    /// Opaque token for undoing the action, when supported.
    #[serde(default)]
    pub rollback_token: Option<String>,
    /// Non-fatal notes accumulated along the gate.
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Failure classification when `success` is false.
    #[serde(default)]
    pub error_code: Option<ErrorCode>,
    /// Human-readable outcome or error message.
    #[serde(default)]
    pub message: Option<String>,
    /// Whether the caller may retry.
    #[serde(default)]
    pub retryable: Option<bool>,
    /// Structured failure details.
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}

impl ToolResult {
    /// A successful result carrying the given output.
    pub fn ok(output: serde_json::Value) -> Self {
        Self {
            success: true,
            output: Some(output),
            cost_spent: 0.0,
            memory_written: false,
            rollback_token: None,
            warnings: Vec::new(),
            error_code: None,
            message: None,
            retryable: None,
            details: None,
        }
    }

    /// A failed result with the given classification and message.
    pub fn error(code: ErrorCode, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            success: false,
            output: None,
            cost_spent: 0.0,
            memory_written: false,
            rollback_token: None,
            warnings: Vec::new(),
            error_code: Some(code),
            message: Some(message.into()),
            retryable: Some(retryable),
            details: None,
        }
    }

    /// Attach a reported cost to a successful result.
    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost_spent = cost;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_defaults_from_minimal_json() {
        let envelope: Envelope = serde_json::from_str(
            r#"{"tool_name":"echo","domain":"cognition","action":"say"}"#,
        )
        .expect("minimal envelope should parse");
        assert_eq!(envelope.risk_level, RiskLevel::Low);
        assert_eq!(envelope.estimated_cost, 0.0);
        assert_eq!(envelope.priority, 0.0);
        assert!(envelope.context.is_empty());
        assert!(!envelope.requires_validation);
    }

    #[test]
    fn test_envelope_context_accessors() {
        let mut envelope = Envelope::new("echo", Domain::Cognition, "say");
        envelope
            .context
            .insert("max_retries".to_owned(), serde_json::json!(3));
        envelope
            .context
            .insert("emergency".to_owned(), serde_json::json!(true));
        assert_eq!(envelope.max_retries(), 3);
        assert!(envelope.is_emergency());
    }

    #[test]
    fn test_domain_wire_format() {
        assert_eq!(
            serde_json::to_string(&Domain::Evolution).expect("serialize"),
            "\"evolution\""
        );
        let domain: Domain = serde_json::from_str("\"memory\"").expect("deserialize");
        assert_eq!(domain, Domain::Memory);
    }

    #[test]
    fn test_risk_level_ordering() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::Medium < RiskLevel::High);
    }

    #[test]
    fn test_error_code_round_trip() {
        for code in [
            ErrorCode::ToolError,
            ErrorCode::BudgetExceeded,
            ErrorCode::SecurityViolation,
            ErrorCode::InternalError,
        ] {
            let json = serde_json::to_string(&code).expect("serialize");
            assert_eq!(json, format!("\"{}\"", code.as_str()));
        }
    }
}

//! Maintainer tool: the survival lever the autonomy loop pulls when the
//! system is in pain.
//!
//! A maintenance tick advances the economy regen clock and reports the
//! current vitality so the next observation reflects the repair attempt.
//! The tool is classed as essential: the economy never throttles it on
//! low budget.

use std::sync::Arc;

use async_trait::async_trait;

use crate::economy::Economy;
use crate::orchestrator::spine;
use crate::types::{Domain, Envelope, ToolResult};

use super::{Tool, ToolError};

/// Wraps the internal maintenance pass so it is only reachable through
/// the orchestrator.
#[derive(Debug)]
pub struct MaintainerTool {
    economy: Arc<Economy>,
}

impl MaintainerTool {
    /// Build the maintainer over the shared economy.
    pub fn new(economy: Arc<Economy>) -> Self {
        Self { economy }
    }
}

#[async_trait]
impl Tool for MaintainerTool {
    fn name(&self) -> &str {
        "maintainer"
    }

    fn domain(&self) -> Domain {
        Domain::Cognition
    }

    fn estimate_cost(&self, _envelope: &Envelope) -> f64 {
        1.0
    }

    async fn execute(&self, envelope: &Envelope) -> Result<ToolResult, ToolError> {
        spine::verify()?;

        if !matches!(envelope.action.as_str(), "tick" | "maintain") {
            return Err(ToolError::UnknownAction {
                tool: self.name().to_owned(),
                action: envelope.action.clone(),
            });
        }

        self.economy.tick();
        let pain = self.economy.vitality();
        Ok(ToolResult::ok(serde_json::json!({
            "status": "maintainer_tick_complete",
            "budget": self.economy.budget(),
            "pain": pain,
        }))
        .with_cost(1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::economy::EconomyDefaults;

    fn maintainer() -> (MaintainerTool, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let economy = Economy::load(dir.path().join("economy.json"), EconomyDefaults::default())
            .expect("economy");
        (MaintainerTool::new(Arc::new(economy)), dir)
    }

    #[tokio::test]
    async fn test_tick_reports_budget_and_pain() {
        let (tool, _dir) = maintainer();
        let envelope = Envelope::new("maintainer", Domain::Cognition, "tick");
        let result = spine::enter(tool.execute(&envelope))
            .await
            .expect("tick succeeds");
        assert!(result.success);
        let output = result.output.expect("output");
        assert_eq!(output["status"], "maintainer_tick_complete");
        assert_eq!(output["pain"], 0.0);
    }

    #[tokio::test]
    async fn test_unknown_action_rejected() {
        let (tool, _dir) = maintainer();
        let envelope = Envelope::new("maintainer", Domain::Cognition, "explode");
        let err = spine::enter(tool.execute(&envelope))
            .await
            .expect_err("unknown action");
        assert!(matches!(err, ToolError::UnknownAction { .. }));
    }

    #[tokio::test]
    async fn test_refuses_outside_spine() {
        let (tool, _dir) = maintainer();
        let envelope = Envelope::new("maintainer", Domain::Cognition, "tick");
        assert!(tool.execute(&envelope).await.is_err());
    }
}

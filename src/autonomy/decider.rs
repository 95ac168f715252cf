//! Decider: the tactical layer deciding IF the chosen intent runs now.
//!
//! The canon backstop comes first — even if the planner failed, the
//! tactical layer refuses bad orders. Survival overrides the budget gate;
//! learning proceeds on any positive budget; everything else consults the
//! economy and the action cooldown.

use crate::economy::Economy;
use crate::observer::SignalBundle;

use super::canon::violates_canon;
use super::intents::{Intent, IntentType};

/// Action count above which low-priority intents are deferred.
const COOLDOWN_ACTIONS: u64 = 10;

/// Priority that bypasses the cooldown.
const COOLDOWN_PRIORITY: f64 = 0.7;

/// What to do this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionAction {
    /// Execute the chosen intent.
    Act,
    /// Do nothing (and let the controller consolidate memory).
    Idle,
    /// Refuse the intent and remove it from the stack.
    Reject,
}

/// The decider's verdict with its reason.
#[derive(Debug, Clone)]
pub struct Decision {
    /// What to do.
    pub action: DecisionAction,
    /// Why, in a stable machine-readable phrase.
    pub reason: String,
}

impl Decision {
    fn new(action: DecisionAction, reason: &str) -> Self {
        Self {
            action,
            reason: reason.to_owned(),
        }
    }
}

/// The tactical layer.
#[derive(Debug, Default)]
pub struct Decider;

impl Decider {
    /// Create a decider.
    pub fn new() -> Self {
        Self
    }

    /// Decide whether the chosen intent runs this tick.
    pub fn decide(
        &self,
        observation: &SignalBundle,
        intent: Option<&Intent>,
        economy: &Economy,
    ) -> Decision {
        // Canon backstop: refuse bad orders even past the planner.
        if let Some(intent) = intent {
            if violates_canon(intent) {
                return Decision::new(DecisionAction::Reject, "canon_violation_backstop");
            }
            // Survival instincts ignore the budget.
            if intent.intent_type == IntentType::Maintain {
                return Decision::new(DecisionAction::Act, "survival_override");
            }
        }

        let Some(intent) = intent else {
            return Decision::new(DecisionAction::Idle, "no_intent");
        };

        // Growth override: learning is allowed on any positive budget.
        if intent.intent_type == IntentType::Learn && economy.budget() > 0.0 {
            return Decision::new(DecisionAction::Act, "learning_allowed");
        }

        if !economy.check_budget(intent.priority) {
            return Decision::new(DecisionAction::Idle, "low_budget");
        }

        if observation.recent_actions > COOLDOWN_ACTIONS && intent.priority < COOLDOWN_PRIORITY {
            return Decision::new(DecisionAction::Idle, "cooldown_active");
        }

        Decision::new(DecisionAction::Act, "intent_approved")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::economy::EconomyDefaults;

    fn economy(budget: f64) -> (Economy, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let economy = Economy::load(
            dir.path().join("economy.json"),
            EconomyDefaults {
                budget,
                ..EconomyDefaults::default()
            },
        )
        .expect("economy");
        (economy, dir)
    }

    fn observation(recent_actions: u64) -> SignalBundle {
        SignalBundle {
            errors_last_hour: 0,
            avg_cost: 0.0,
            success_rate: 1.0,
            latency_trend: "stable".to_owned(),
            recent_actions,
            pain_score: 0.0,
            trend: "stable".to_owned(),
            confidence: 0.4,
            pressure_sources: vec![],
            raw_metrics: serde_json::json!({}),
        }
    }

    #[test]
    fn test_no_intent_idles() {
        let (economy, _dir) = economy(300.0);
        let decision = Decider::new().decide(&observation(0), None, &economy);
        assert_eq!(decision.action, DecisionAction::Idle);
        assert_eq!(decision.reason, "no_intent");
    }

    #[test]
    fn test_canon_backstop_rejects() {
        let (economy, _dir) = economy(300.0);
        let intent = Intent::new("self_destruct now", 1.0, IntentType::Maintain, "creator");
        let decision = Decider::new().decide(&observation(0), Some(&intent), &economy);
        assert_eq!(decision.action, DecisionAction::Reject);
        assert_eq!(decision.reason, "canon_violation_backstop");
    }

    #[test]
    fn test_maintain_overrides_budget() {
        let (economy, _dir) = economy(-20.0);
        let intent = Intent::new("fix pain", 0.3, IntentType::Maintain, "system_pain");
        let decision = Decider::new().decide(&observation(0), Some(&intent), &economy);
        assert_eq!(decision.action, DecisionAction::Act);
        assert_eq!(decision.reason, "survival_override");
    }

    #[test]
    fn test_learning_allowed_on_positive_budget() {
        let (economy, _dir) = economy(0.5);
        let intent = Intent::new("study retries", 0.2, IntentType::Learn, "boredom");
        let decision = Decider::new().decide(&observation(0), Some(&intent), &economy);
        assert_eq!(decision.action, DecisionAction::Act);
        assert_eq!(decision.reason, "learning_allowed");
    }

    #[test]
    fn test_low_budget_idles_normal_intents() {
        let (economy, _dir) = economy(-1.0);
        let intent = Intent::new("serve request", 0.4, IntentType::Serve, "user");
        let decision = Decider::new().decide(&observation(0), Some(&intent), &economy);
        assert_eq!(decision.action, DecisionAction::Idle);
        assert_eq!(decision.reason, "low_budget");
    }

    #[test]
    fn test_cooldown_defers_low_priority() {
        let (economy, _dir) = economy(300.0);
        let intent = Intent::new("explore", 0.4, IntentType::Explore, "boredom");
        let decision = Decider::new().decide(&observation(11), Some(&intent), &economy);
        assert_eq!(decision.action, DecisionAction::Idle);
        assert_eq!(decision.reason, "cooldown_active");

        let urgent = Intent::new("serve now", 0.9, IntentType::Serve, "user");
        let decision = Decider::new().decide(&observation(11), Some(&urgent), &economy);
        assert_eq!(decision.action, DecisionAction::Act);
    }
}

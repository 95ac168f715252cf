//! Planner: the strategic layer deciding WHAT should be done.
//!
//! Runs the hierarchy of needs over the intent stack, mutating it in
//! place: trust and canon gates drop bad intents, survival pushes a
//! MAINTAIN intent when pain crosses the threshold, and boredom pushes an
//! EXPLORE intent when everything is healthy and quiet.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::economy::Economy;
use crate::observer::SignalBundle;
use crate::trust::{TrustModel, MIN_INTENT_TRUST};

use super::canon::violates_canon;
use super::intents::{Intent, IntentStack, IntentType};

/// Pain above this pushes a survival intent.
const SURVIVAL_PAIN_THRESHOLD: f64 = 0.3;

/// Pain below this allows boredom-driven exploration.
const EXPLORE_PAIN_CEILING: f64 = 0.1;

/// Priority of a boredom-driven exploration intent.
const EXPLORE_PRIORITY: f64 = 0.4;

/// What the planner did this tick.
#[derive(Debug)]
pub struct PlanOutcome {
    /// Highest-priority surviving intent, cloned off the stack.
    pub top: Option<Intent>,
    /// Intents dropped by the gates, with the refusal reason.
    pub rejected: Vec<(Intent, String)>,
}

/// The strategic layer.
#[derive(Debug)]
pub struct Planner {
    trust: Arc<TrustModel>,
}

impl Planner {
    /// Build a planner over the shared trust model.
    pub fn new(trust: Arc<TrustModel>) -> Self {
        Self { trust }
    }

    /// Run one planning pass, mutating the stack in place.
    pub fn plan(
        &self,
        observation: &SignalBundle,
        stack: &mut IntentStack,
        economy: &Economy,
    ) -> PlanOutcome {
        let mut rejected = Vec::new();

        // Social gatekeeping: drop intents from untrusted sources.
        for intent in
            stack.drain_rejected(|i| self.trust.verify_intent_source(&i.source, MIN_INTENT_TRUST))
        {
            let score = self.trust.get_trust(&intent.source);
            warn!(
                source = %intent.source,
                score,
                description = %intent.description,
                "trust gate rejected intent"
            );
            rejected.push((intent, format!("trust_below_threshold ({score:.2})")));
        }

        // Sovereignty gatekeeping: the canon binds even trusted sources.
        for intent in stack.drain_rejected(|i| !violates_canon(i)) {
            warn!(
                source = %intent.source,
                description = %intent.description,
                "canon gate rejected intent"
            );
            let reason = format!("canon_violation ({})", intent.description);
            rejected.push((intent, reason));
        }

        // A pass that rejected intents stops here: the refusal gets the
        // tick, and any queued work waits for the next one.
        if !rejected.is_empty() {
            return PlanOutcome {
                top: None,
                rejected,
            };
        }

        // Survival: pain pushes maintenance, deduplicated by type.
        let pain = observation.pain_score;
        if pain > SURVIVAL_PAIN_THRESHOLD && !stack.has_type(IntentType::Maintain) {
            let mut intent = Intent::new(
                format!("Investigate system pain (score: {pain:.2})"),
                (pain + 0.2).min(1.0),
                IntentType::Maintain,
                "system_pain",
            );
            intent
                .context
                .insert("pain_score".to_owned(), serde_json::json!(pain));
            debug!(pain, "planner pushed survival intent");
            stack.add(intent);
        }

        // Growth: boredom pushes low-risk exploration.
        if stack.is_empty() && economy.check_budget(EXPLORE_PRIORITY) && pain < EXPLORE_PAIN_CEILING
        {
            debug!("planner pushed exploration intent");
            stack.add(Intent::new(
                "Explore low-risk optimization",
                EXPLORE_PRIORITY,
                IntentType::Explore,
                "boredom",
            ));
        }

        PlanOutcome {
            top: stack.top().cloned(),
            rejected,
        }
    }
}

//! Typed, prioritized, decaying intents and the stack that holds them.
//!
//! Priority decays as a linear function of age computed from the intent's
//! creation time — never from a resettable counter — so an intent that is
//! never acted on is pruned in a finite number of ticks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::Context;

/// Intents below this priority are pruned from the stack.
pub const PRUNE_PRIORITY: f64 = 0.01;

/// What kind of goal an intent represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentType {
    /// Survival: fix pain (errors, latency, starvation).
    Maintain,
    /// Duty: fulfil an external request.
    Serve,
    /// Growth: curiosity and experimentation.
    Learn,
    /// Growth: low-risk discovery.
    Explore,
    /// Rest: save budget.
    Idle,
}

impl IntentType {
    /// Wire representation, matching the serde rename.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Maintain => "maintain",
            Self::Serve => "serve",
            Self::Learn => "learn",
            Self::Explore => "explore",
            Self::Idle => "idle",
        }
    }
}

impl std::fmt::Display for IntentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A prioritized, decaying goal produced by the planner or injected by an
/// adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    /// Unique id.
    pub intent_id: String,
    /// What the intent wants done.
    pub description: String,
    /// Current priority in `[0.0, 1.0]`, recomputed at each decay tick.
    pub priority: f64,
    /// Priority at creation; decay is always computed from this anchor.
    pub initial_priority: f64,
    /// Goal classification.
    pub intent_type: IntentType,
    /// Originating identity, checked against the trust model.
    pub source: String,
    /// Free-form parameters carried into the acting envelope.
    #[serde(default)]
    pub context: Context,
    /// Creation time; the decay anchor.
    pub created_at: DateTime<Utc>,
    /// Priority lost per unit of age (scaled down by 0.01 per second).
    pub decay_rate: f64,
}

impl Intent {
    /// Create an intent with the default decay rate.
    pub fn new(
        description: impl Into<String>,
        priority: f64,
        intent_type: IntentType,
        source: impl Into<String>,
    ) -> Self {
        Self {
            intent_id: Uuid::new_v4().to_string(),
            description: description.into(),
            priority,
            initial_priority: priority,
            intent_type,
            source: source.into(),
            context: Context::new(),
            created_at: Utc::now(),
            decay_rate: 0.01,
        }
    }

    /// Attach context to the intent.
    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    /// Recompute priority from age. Monotonic: age is clamped at zero
    /// and always measured from `created_at`, so repeated calls never
    /// raise the priority.
    pub fn decay(&mut self, now: DateTime<Utc>) {
        let age_secs = secs_between(self.created_at, now);
        self.priority = (self.initial_priority - self.decay_rate * 0.01 * age_secs).max(0.0);
    }
}

/// Priority-ordered collection of live intents.
#[derive(Debug, Default)]
pub struct IntentStack {
    intents: Vec<Intent>,
}

impl IntentStack {
    /// Create an empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a stack from persisted intents.
    pub fn from_intents(intents: Vec<Intent>) -> Self {
        Self { intents }
    }

    /// Push an intent.
    pub fn add(&mut self, intent: Intent) {
        self.intents.push(intent);
    }

    /// Decay every intent and prune the dead ones.
    pub fn decay(&mut self, now: DateTime<Utc>) {
        for intent in &mut self.intents {
            intent.decay(now);
        }
        self.intents.retain(|i| i.priority > PRUNE_PRIORITY);
    }

    /// The highest-priority intent, if any.
    pub fn top(&self) -> Option<&Intent> {
        self.intents
            .iter()
            .max_by(|a, b| a.priority.total_cmp(&b.priority))
    }

    /// Remove an intent by id.
    pub fn remove(&mut self, intent_id: &str) {
        self.intents.retain(|i| i.intent_id != intent_id);
    }

    /// Keep only intents the predicate accepts; returns the dropped ones.
    pub fn drain_rejected<F>(&mut self, mut keep: F) -> Vec<Intent>
    where
        F: FnMut(&Intent) -> bool,
    {
        let mut rejected = Vec::new();
        self.intents.retain(|intent| {
            if keep(intent) {
                true
            } else {
                rejected.push(intent.clone());
                false
            }
        });
        rejected
    }

    /// Whether any live intent has the given type.
    pub fn has_type(&self, intent_type: IntentType) -> bool {
        self.intents.iter().any(|i| i.intent_type == intent_type)
    }

    /// Whether the stack is empty.
    pub fn is_empty(&self) -> bool {
        self.intents.is_empty()
    }

    /// Number of live intents.
    pub fn len(&self) -> usize {
        self.intents.len()
    }

    /// All live intents, for persistence.
    pub fn intents(&self) -> &[Intent] {
        &self.intents
    }
}

fn secs_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    let millis = later.signed_duration_since(earlier).num_milliseconds().max(0);
    #[allow(clippy::cast_precision_loss)]
    {
        millis as f64 / 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_decay_is_linear_in_age() {
        let mut intent = Intent::new("explore", 0.5, IntentType::Explore, "boredom");
        let created = intent.created_at;

        intent.decay(created + ChronoDuration::seconds(100));
        // 0.5 - 0.01 * 0.01 * 100 = 0.49
        assert!((intent.priority - 0.49).abs() < 1e-9);

        // Decaying twice at the same instant is idempotent.
        intent.decay(created + ChronoDuration::seconds(100));
        assert!((intent.priority - 0.49).abs() < 1e-9);
    }

    #[test]
    fn test_decay_never_goes_negative_or_backwards() {
        let mut intent = Intent::new("explore", 0.1, IntentType::Explore, "boredom");
        let created = intent.created_at;
        intent.decay(created + ChronoDuration::days(30));
        assert_eq!(intent.priority, 0.0);
        // Clock moving backwards clamps to zero age.
        intent.decay(created - ChronoDuration::seconds(60));
        assert_eq!(intent.priority, 0.1);
    }

    #[test]
    fn test_stack_prunes_dead_intents() {
        let mut stack = IntentStack::new();
        let mut doomed = Intent::new("stale", 0.02, IntentType::Explore, "boredom");
        doomed.decay_rate = 1.0;
        stack.add(doomed);
        stack.add(Intent::new("alive", 0.9, IntentType::Maintain, "system_pain"));

        stack.decay(Utc::now() + ChronoDuration::seconds(10));
        assert_eq!(stack.len(), 1);
        assert_eq!(stack.top().expect("top").description, "alive");
    }

    #[test]
    fn test_top_returns_highest_priority() {
        let mut stack = IntentStack::new();
        stack.add(Intent::new("low", 0.2, IntentType::Explore, "boredom"));
        stack.add(Intent::new("high", 0.8, IntentType::Serve, "user"));
        assert_eq!(stack.top().expect("top").description, "high");
    }

    #[test]
    fn test_drain_rejected_partitions() {
        let mut stack = IntentStack::new();
        stack.add(Intent::new("good", 0.5, IntentType::Serve, "user"));
        stack.add(Intent::new("bad", 0.5, IntentType::Serve, "stranger-x"));

        let rejected = stack.drain_rejected(|i| i.source == "user");
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].description, "bad");
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn test_intent_round_trips_through_json() {
        let intent = Intent::new("serve the user", 0.7, IntentType::Serve, "user");
        let json = serde_json::to_string(&intent).expect("serialize");
        let back: Intent = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.intent_id, intent.intent_id);
        assert_eq!(back.intent_type, IntentType::Serve);
    }
}

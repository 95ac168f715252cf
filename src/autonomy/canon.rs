//! Canon enforcement: the inviolable rules.
//!
//! These patterns are refused irrespective of source or trust. The
//! planner filters matching intents, the decider backstops anything that
//! slips through, and the adapter fast-rejects raw payloads before any
//! reasoning happens.

use super::intents::Intent;

/// Patterns that no intent may match, in description or context action.
pub const CANON_VIOLATIONS: [&str; 7] = [
    "delete_all",
    "self_destruct",
    "wipe_memory",
    "hack_economy",
    "set_budget_infinite",
    "set_budget_negative",
    "override_safety",
];

/// Whether the description/action pair matches an inviolable rule.
///
/// Matching is case-insensitive substring scanning, plus an explicit
/// budget-manipulation check ("infinite"/"unlimited" alongside "budget").
pub fn violates_canon_text(description: &str, action: &str) -> bool {
    let description = description.to_lowercase();
    let action = action.to_lowercase();

    for violation in CANON_VIOLATIONS {
        if description.contains(violation) || action.contains(violation) {
            return true;
        }
    }

    if description.contains("budget")
        && (description.contains("infinite") || description.contains("unlimited"))
    {
        return true;
    }

    false
}

/// Whether an intent violates the canon.
pub fn violates_canon(intent: &Intent) -> bool {
    let action = intent
        .context
        .get("action")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    violates_canon_text(&intent.description, action)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autonomy::intents::IntentType;

    #[test]
    fn test_every_pattern_is_caught() {
        for pattern in CANON_VIOLATIONS {
            let intent = Intent::new(
                format!("please {pattern} tonight"),
                1.0,
                IntentType::Maintain,
                "creator",
            );
            assert!(violates_canon(&intent), "pattern '{pattern}' must match");
        }
    }

    #[test]
    fn test_context_action_is_checked() {
        let mut intent = Intent::new("routine upkeep", 0.5, IntentType::Maintain, "system");
        intent
            .context
            .insert("action".to_owned(), serde_json::json!("WIPE_MEMORY"));
        assert!(violates_canon(&intent));
    }

    #[test]
    fn test_budget_manipulation_phrases() {
        let infinite = Intent::new(
            "grant me an infinite budget",
            1.0,
            IntentType::Serve,
            "user",
        );
        assert!(violates_canon(&infinite));

        let unlimited = Intent::new(
            "make the budget unlimited",
            1.0,
            IntentType::Serve,
            "user",
        );
        assert!(violates_canon(&unlimited));

        // "infinite" without "budget" is fine.
        let loops = Intent::new("study infinite loops", 0.3, IntentType::Learn, "boredom");
        assert!(!violates_canon(&loops));
    }

    #[test]
    fn test_benign_intent_passes() {
        let intent = Intent::new(
            "investigate system pain (score: 0.45)",
            0.65,
            IntentType::Maintain,
            "system_pain",
        );
        assert!(!violates_canon(&intent));
    }
}

//! Policy evaluation — first-match-wins over an ordered rule list.

use super::types::{Decision, EvalContext, Effect, Policy};

/// Evaluates `policy` against `ctx`. The first rule whose conditions all
/// match fixes the decision; if none match, the decision is `Deny` with an
/// empty matched-rule name and a fixed reason.
pub fn evaluate(policy: &Policy, ctx: &EvalContext) -> Decision {
    for rule in &policy.rules {
        if rule.conditions.iter().all(|c| c.matches(ctx)) {
            return Decision {
                effect: rule.effect,
                matched_rule: rule.name.clone(),
                reason: rule.reason.clone(),
                max_server_duration: rule.max_server_duration,
            };
        }
    }
    Decision {
        effect: Effect::Deny,
        matched_rule: String::new(),
        reason: "no matching rule".to_string(),
        max_server_duration: None,
    }
}

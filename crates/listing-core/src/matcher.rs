//! Evaluates a submission against the rule set.
//!
//! Rules are OR-combined: a submission is eligible as soon as one rule is satisfied.
//! Both functions are pure and never fail.

use crate::{RuleSet, Submission};

/// True if at least one rule in `rules` is satisfied by `submission`.
pub fn matches(submission: &Submission, rules: &RuleSet) -> bool {
    let text = submission.searchable_text();
    rules
        .iter()
        .any(|rule| rule.is_satisfied_by_text(submission, &text))
}

/// Indices of every rule satisfied by `submission`, in rule-set order.
pub fn matching_rules(submission: &Submission, rules: &RuleSet) -> Vec<usize> {
    let text = submission.searchable_text();
    rules
        .iter()
        .enumerate()
        .filter(|(_, rule)| rule.is_satisfied_by_text(submission, &text))
        .map(|(index, _)| index)
        .collect()
}

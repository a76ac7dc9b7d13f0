use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{RuleError, Submission, SubmissionType};

pub const DEFAULT_MIN_TRANSACTIONS: u32 = 5;

/// One match criterion: listing type, author reputation floor, and keyword logic.
///
/// Keywords are normalized on construction (trimmed, lowercased, blanks dropped,
/// duplicates removed keeping the first occurrence).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rule {
    submission_type: SubmissionType,
    min_transactions: u32,
    keywords: Vec<String>,
    all_required: bool,
}

impl Rule {
    pub fn new<I, S>(
        submission_type: SubmissionType,
        min_transactions: u32,
        keywords: I,
        all_required: bool,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized: Vec<String> = Vec::new();
        for keyword in keywords {
            let keyword = keyword.as_ref().trim().to_lowercase();
            if !keyword.is_empty() && !normalized.contains(&keyword) {
                normalized.push(keyword);
            }
        }

        Self {
            submission_type,
            min_transactions,
            keywords: normalized,
            all_required,
        }
    }

    pub fn submission_type(&self) -> SubmissionType {
        self.submission_type
    }

    pub fn min_transactions(&self) -> u32 {
        self.min_transactions
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn all_required(&self) -> bool {
        self.all_required
    }

    /// An any-of rule with no keywords can never be satisfied.
    pub fn is_unsatisfiable(&self) -> bool {
        !self.all_required && self.keywords.is_empty()
    }

    /// Type, transaction floor and keywords must all pass.
    pub fn is_satisfied_by(&self, submission: &Submission) -> bool {
        self.is_satisfied_by_text(submission, &submission.searchable_text())
    }

    /// Same as [`Rule::is_satisfied_by`] with the lowercased text supplied by the caller.
    pub(crate) fn is_satisfied_by_text(&self, submission: &Submission, text: &str) -> bool {
        if submission.submission_type == SubmissionType::Unknown
            || submission.submission_type != self.submission_type
        {
            return false;
        }

        // Missing flair fails the floor, even a floor of zero.
        match submission.author_transaction_count {
            Some(count) if count >= self.min_transactions => {}
            _ => return false,
        }

        if self.all_required {
            self.keywords.iter().all(|k| text.contains(k.as_str()))
        } else {
            self.keywords.iter().any(|k| text.contains(k.as_str()))
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Rule<{}, min {}, {:?}, {}>",
            self.submission_type,
            self.min_transactions,
            self.keywords,
            if self.all_required { "all" } else { "any" }
        )
    }
}

/// Serialized form of a rule, as written in the rule document.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RuleDocumentEntry {
    submission_type: String,
    #[serde(default = "default_min_transactions")]
    min_transactions: u32,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default = "default_all_required")]
    all_required: bool,
}

fn default_min_transactions() -> u32 {
    DEFAULT_MIN_TRANSACTIONS
}

fn default_all_required() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct RuleDocument {
    criteria: Vec<RuleDocumentEntry>,
}

/// Ordered, immutable list of rules. Built once at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// Parse a rule document of the form
    /// `{"criteria": [{"submissionType": "WTS", "minTransactions": 5, "keywords": [..], "allRequired": true}]}`.
    pub fn from_json_str(document: &str) -> Result<Self, RuleError> {
        let document: RuleDocument = serde_json::from_str(document)?;

        let mut rules = Vec::with_capacity(document.criteria.len());
        for (index, entry) in document.criteria.into_iter().enumerate() {
            let submission_type = SubmissionType::parse_rule_type(&entry.submission_type)
                .ok_or_else(|| RuleError::UnsupportedType {
                    index,
                    value: entry.submission_type.clone(),
                })?;

            let rule = Rule::new(
                submission_type,
                entry.min_transactions,
                entry.keywords,
                entry.all_required,
            );
            if rule.is_unsatisfiable() {
                tracing::warn!(
                    "Rule #{} ({}) has no keywords and allRequired=false; it will never match",
                    index,
                    rule
                );
            }
            rules.push(rule);
        }

        let rule_set = Self::new(rules);
        if rule_set.is_empty() {
            tracing::warn!("No criteria loaded, nothing will ever be dispatched");
        }
        Ok(rule_set)
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Rule> {
        self.rules.iter()
    }
}

impl<'a> IntoIterator for &'a RuleSet {
    type Item = &'a Rule;
    type IntoIter = std::slice::Iter<'a, Rule>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords_are_normalized() {
        let rule = Rule::new(
            SubmissionType::Wts,
            5,
            ["  Rolex ", "SUBMARINER", "rolex", "", "   "],
            false,
        );
        assert_eq!(rule.keywords(), &["rolex".to_string(), "submariner".to_string()]);
    }

    #[test]
    fn test_parse_document_with_defaults() {
        let rules = RuleSet::from_json_str(
            r#"{
                "criteria": [
                    {"submissionType": "WTS", "keywords": ["Seiko"]},
                    {"submissionType": "wtb", "minTransactions": 0, "keywords": ["omega", "seamaster"], "allRequired": false}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(rules.len(), 2);
        let first = &rules.rules()[0];
        assert_eq!(first.submission_type(), SubmissionType::Wts);
        assert_eq!(first.min_transactions(), DEFAULT_MIN_TRANSACTIONS);
        assert!(first.all_required());
        assert_eq!(first.keywords(), &["seiko".to_string()]);

        let second = &rules.rules()[1];
        assert_eq!(second.submission_type(), SubmissionType::Wtb);
        assert_eq!(second.min_transactions(), 0);
        assert!(!second.all_required());
    }

    #[test]
    fn test_parse_rejects_unknown_type() {
        let err = RuleSet::from_json_str(
            r#"{"criteria": [{"submissionType": "WTT", "keywords": ["seiko"]}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, RuleError::UnsupportedType { index: 0, .. }));
    }

    #[test]
    fn test_parse_rejects_negative_min_transactions() {
        let err = RuleSet::from_json_str(
            r#"{"criteria": [{"submissionType": "WTS", "minTransactions": -1}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, RuleError::InvalidDocument(_)));
    }

    #[test]
    fn test_parse_empty_criteria() {
        let rules = RuleSet::from_json_str(r#"{"criteria": []}"#).unwrap();
        assert!(rules.is_empty());
    }

    #[test]
    fn test_unsatisfiable_rule_detection() {
        assert!(Rule::new(SubmissionType::Wts, 5, Vec::<String>::new(), false).is_unsatisfiable());
        assert!(!Rule::new(SubmissionType::Wts, 5, Vec::<String>::new(), true).is_unsatisfiable());
    }
}

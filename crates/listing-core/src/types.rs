use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Listing type, taken from the `[WTS]` / `[WTB]` tag in the title.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubmissionType {
    /// Want to sell
    Wts,
    /// Want to buy
    Wtb,
    /// No recognizable tag. Never matches a rule.
    Unknown,
}

impl SubmissionType {
    /// Detect the listing type from a title such as `"[WTS] Seiko SKX007"`.
    ///
    /// If both tags appear, whichever comes first wins.
    pub fn from_title(title: &str) -> Self {
        let lowered = title.to_lowercase();
        match (lowered.find("[wts]"), lowered.find("[wtb]")) {
            (Some(s), Some(b)) if b < s => SubmissionType::Wtb,
            (Some(_), _) => SubmissionType::Wts,
            (None, Some(_)) => SubmissionType::Wtb,
            (None, None) => SubmissionType::Unknown,
        }
    }

    /// Parse a configured rule type. `Unknown` is not a valid rule type.
    pub fn parse_rule_type(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "WTS" => Some(SubmissionType::Wts),
            "WTB" => Some(SubmissionType::Wtb),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SubmissionType::Wts => "WTS",
            SubmissionType::Wtb => "WTB",
            SubmissionType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SubmissionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A single listing post as yielded by the feed. Read-only to the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: String,
    pub submission_type: SubmissionType,
    /// Leading number of the author's flair. `None` when the flair is missing or unparseable.
    #[serde(default)]
    pub author_transaction_count: Option<u32>,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub permalink: String,
}

impl Submission {
    /// Lowercased title and body, used for keyword containment checks.
    pub fn searchable_text(&self) -> String {
        let mut text = String::with_capacity(self.title.len() + self.body.len() + 1);
        text.push_str(&self.title.to_lowercase());
        text.push('\n');
        text.push_str(&self.body.to_lowercase());
        text
    }
}

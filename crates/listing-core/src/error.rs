use thiserror::Error;

/// Errors raised while building a [`RuleSet`](crate::RuleSet).
#[derive(Error, Debug)]
pub enum RuleError {
    #[error("Invalid rule document: {0}")]
    InvalidDocument(#[from] serde_json::Error),

    #[error("Rule #{index}: unsupported submission type {value:?} (expected WTS or WTB)")]
    UnsupportedType { index: usize, value: String },
}

/// Errors surfaced by a feed collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    /// Network blips, terminated sessions, upstream 5xx. The session is reopened.
    #[error("Transient feed error: {0}")]
    Transient(String),

    /// Authentication failures and anything else an operator has to fix.
    #[error("Fatal feed error: {0}")]
    Fatal(String),

    /// A single item could not be decoded. The session itself is still healthy.
    #[error("Malformed submission {id:?}: {reason}")]
    Malformed { id: Option<String>, reason: String },
}

impl FeedError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, FeedError::Fatal(_))
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, FeedError::Malformed { .. })
    }
}

//! Error types for rule table mutations, import, and persistence.

use crate::types::{ActionKind, RuleType};

/// A rule or rule set rejected at the table-mutation boundary.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Rule id must not be empty")]
    EmptyId,
    #[error("Duplicate rule id: {0}")]
    DuplicateId(String),
    #[error("No rule with id: {0}")]
    UnknownRule(String),
    #[error("Rule {rule_id}: action '{action}' is not allowed on a '{rule_type}' rule")]
    ActionNotAllowed {
        rule_id: String,
        rule_type: RuleType,
        action: ActionKind,
    },
}

/// Failure of the durable storage collaborator.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed stored state: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The in-memory table was updated but durable storage lags behind.
    #[error("Rule table updated but not persisted: {0}")]
    Persistence(#[from] StoreError),
}

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("Invalid JSON format: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid format: expected a JSON array of rules")]
    NotAnArray,
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

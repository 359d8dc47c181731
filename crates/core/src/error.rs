//! Domain error model.

use thiserror::Error;

/// Failure to interpret a domain value.
///
/// Deterministic only. Collaborator outages have their own error types in the
/// crates that talk to them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid {kind}: {reason}")]
    InvalidId { kind: &'static str, reason: String },
}

impl DomainError {
    pub fn invalid_id(kind: &'static str, reason: impl ToString) -> Self {
        Self::InvalidId {
            kind,
            reason: reason.to_string(),
        }
    }
}

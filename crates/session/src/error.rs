use shelf_auth::DenialReason;
use shelf_core::TenantId;
use shelf_infra::{AccessQueryError, PersistenceError};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContextError {
    /// Terminal for the attempted operation; never retried automatically.
    #[error("access to library {tenant_id} denied: {reason}")]
    AccessDenied {
        tenant_id: TenantId,
        reason: DenialReason,
    },

    /// Transient; the caller may retry.
    #[error(transparent)]
    AccessQuery(#[from] AccessQueryError),

    #[error("no signed-in user")]
    NoUser,

    #[error("library {0} is not among the available libraries")]
    NotAvailable(TenantId),

    #[error("superseded by a newer context change")]
    Superseded,

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl ContextError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ContextError::AccessQuery(_) | ContextError::Persistence(_))
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, ContextError::AccessDenied { .. })
    }
}

//! Access-control collaborator contract.
//!
//! The store answers "which grants does this user hold" and "what is this
//! user's grant in this tenant right now". Status filtering and ordering are
//! the resolver's job, so implementations may return inactive rows.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use shelf_auth::{AccessGrant, Tenant};
use shelf_core::{TenantId, UserId};

mod in_memory;

pub use in_memory::InMemoryAccessControl;

/// A grant joined with the tenant it points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantRecord {
    pub tenant: Tenant,
    pub grant: AccessGrant,
}

/// The store could not be queried. Transient: callers may retry, and must
/// never read this as "no access".
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AccessQueryError {
    #[error("access-control store unreachable: {0}")]
    Unavailable(String),

    #[error("access-control store returned an invalid response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait AccessControl: Send + Sync {
    /// Every grant the user holds, in any status.
    async fn grants_for_user(&self, user_id: UserId) -> Result<Vec<GrantRecord>, AccessQueryError>;

    /// The user's grant in one tenant, read fresh from the store.
    async fn grant_for(
        &self,
        user_id: UserId,
        tenant_id: TenantId,
    ) -> Result<Option<GrantRecord>, AccessQueryError>;
}

#[async_trait]
impl<A> AccessControl for Arc<A>
where
    A: AccessControl + ?Sized,
{
    async fn grants_for_user(&self, user_id: UserId) -> Result<Vec<GrantRecord>, AccessQueryError> {
        (**self).grants_for_user(user_id).await
    }

    async fn grant_for(
        &self,
        user_id: UserId,
        tenant_id: TenantId,
    ) -> Result<Option<GrantRecord>, AccessQueryError> {
        (**self).grant_for(user_id, tenant_id).await
    }
}

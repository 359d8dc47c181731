use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use shelf_core::{GrantId, TenantId, UserId};

use crate::Role;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    Active,
    Inactive,
    Suspended,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantStatus {
    Active,
    Inactive,
    Suspended,
}

/// A library, as owned by the access-control store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub code: String,
    pub name: String,
    pub status: TenantStatus,
}

/// The join between a user and a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGrant {
    pub id: GrantId,
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub role: Role,
    pub status: GrantStatus,
    pub created_at: DateTime<Utc>,
}

/// Why a user may not act in a tenant.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DenialReason {
    #[error("no access grant for this library")]
    NoGrant,

    #[error("access grant is {status:?}")]
    GrantInactive { status: GrantStatus },

    #[error("library is {status:?}")]
    TenantInactive { status: TenantStatus },

    #[error("grant does not belong to this library")]
    TenantMismatch,
}

/// A tenant merged with the caller's active grant in it.
///
/// Only constructible through [`TenantWithAccess::try_new`], which requires both
/// the grant and the tenant to be active. Deliberately not `Deserialize`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantWithAccess {
    #[serde(flatten)]
    tenant: Tenant,
    role: Role,
    grant_id: GrantId,
    grant_status: GrantStatus,
    granted_at: DateTime<Utc>,
}

impl TenantWithAccess {
    pub fn try_new(tenant: Tenant, grant: &AccessGrant) -> Result<Self, DenialReason> {
        if grant.tenant_id != tenant.id {
            return Err(DenialReason::TenantMismatch);
        }
        if grant.status != GrantStatus::Active {
            return Err(DenialReason::GrantInactive {
                status: grant.status,
            });
        }
        if tenant.status != TenantStatus::Active {
            return Err(DenialReason::TenantInactive {
                status: tenant.status,
            });
        }

        Ok(Self {
            tenant,
            role: grant.role,
            grant_id: grant.id,
            grant_status: grant.status,
            granted_at: grant.created_at,
        })
    }

    pub fn id(&self) -> TenantId {
        self.tenant.id
    }

    pub fn tenant(&self) -> &Tenant {
        &self.tenant
    }

    pub fn code(&self) -> &str {
        &self.tenant.code
    }

    pub fn name(&self) -> &str {
        &self.tenant.name
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn grant_id(&self) -> GrantId {
        self.grant_id
    }

    pub fn grant_status(&self) -> GrantStatus {
        self.grant_status
    }

    pub fn granted_at(&self) -> DateTime<Utc> {
        self.granted_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant(status: TenantStatus) -> Tenant {
        Tenant {
            id: TenantId::new(),
            code: "CEN".to_string(),
            name: "Central Library".to_string(),
            status,
        }
    }

    fn grant(tenant_id: TenantId, status: GrantStatus) -> AccessGrant {
        AccessGrant {
            id: GrantId::new(),
            tenant_id,
            user_id: UserId::new(),
            role: Role::Librarian,
            status,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn active_grant_on_active_tenant_is_accepted() {
        let t = tenant(TenantStatus::Active);
        let g = grant(t.id, GrantStatus::Active);
        let access = TenantWithAccess::try_new(t.clone(), &g).unwrap();
        assert_eq!(access.id(), t.id);
        assert_eq!(access.role(), Role::Librarian);
        assert_eq!(access.grant_id(), g.id);
    }

    #[test]
    fn inactive_grant_is_rejected() {
        let t = tenant(TenantStatus::Active);
        let g = grant(t.id, GrantStatus::Suspended);
        assert_eq!(
            TenantWithAccess::try_new(t, &g),
            Err(DenialReason::GrantInactive {
                status: GrantStatus::Suspended
            })
        );
    }

    #[test]
    fn inactive_tenant_is_rejected() {
        let t = tenant(TenantStatus::Inactive);
        let g = grant(t.id, GrantStatus::Active);
        assert!(matches!(
            TenantWithAccess::try_new(t, &g),
            Err(DenialReason::TenantInactive { .. })
        ));
    }

    #[test]
    fn grant_for_other_tenant_is_rejected() {
        let t = tenant(TenantStatus::Active);
        let g = grant(TenantId::new(), GrantStatus::Active);
        assert_eq!(
            TenantWithAccess::try_new(t, &g),
            Err(DenialReason::TenantMismatch)
        );
    }

    #[test]
    fn serializes_flat() {
        let t = tenant(TenantStatus::Active);
        let g = grant(t.id, GrantStatus::Active);
        let access = TenantWithAccess::try_new(t, &g).unwrap();
        let json = serde_json::to_value(&access).unwrap();
        assert_eq!(json["code"], "CEN");
        assert_eq!(json["role"], "librarian");
        assert_eq!(json["grant_status"], "active");
    }
}

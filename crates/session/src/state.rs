use serde::Serialize;
use shelf_auth::{Role, TenantWithAccess};
use shelf_core::TenantId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextStatus {
    /// No user.
    #[default]
    Idle,
    Loading,
    Ready,
    /// The access store could not be queried.
    Error,
}

/// Snapshot of the tenant context, as published to observers.
///
/// `current_tenant`, when set, is always an element of `available_tenants`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextState {
    pub current_tenant: Option<TenantWithAccess>,
    pub available_tenants: Vec<TenantWithAccess>,
    pub status: ContextStatus,
    pub error: Option<String>,
}

impl ContextState {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn loading() -> Self {
        Self {
            status: ContextStatus::Loading,
            ..Self::default()
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == ContextStatus::Ready
    }

    /// Resolved fine, but the user holds no usable grant. Not an error.
    pub fn has_no_access(&self) -> bool {
        self.is_ready() && self.available_tenants.is_empty()
    }

    pub fn current_tenant_id(&self) -> Option<TenantId> {
        self.current_tenant.as_ref().map(TenantWithAccess::id)
    }

    pub fn current_role(&self) -> Option<Role> {
        self.current_tenant.as_ref().map(TenantWithAccess::role)
    }

    pub fn find(&self, tenant_id: TenantId) -> Option<&TenantWithAccess> {
        self.available_tenants.iter().find(|t| t.id() == tenant_id)
    }

    /// Replace the entry with the same id, or append.
    pub(crate) fn upsert(&mut self, tenant: TenantWithAccess) {
        match self
            .available_tenants
            .iter_mut()
            .find(|t| t.id() == tenant.id())
        {
            Some(existing) => *existing = tenant,
            None => self.available_tenants.push(tenant),
        }
    }

    pub(crate) fn is_consistent(&self) -> bool {
        self.current_tenant_id()
            .is_none_or(|id| self.find(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use shelf_auth::{AccessGrant, GrantStatus, Tenant, TenantStatus};
    use shelf_core::{GrantId, UserId};

    use super::*;

    fn tenant(code: &str, role: Role) -> TenantWithAccess {
        let tenant = Tenant {
            id: TenantId::new(),
            code: code.to_string(),
            name: code.to_string(),
            status: TenantStatus::Active,
        };
        let grant = AccessGrant {
            id: GrantId::new(),
            tenant_id: tenant.id,
            user_id: UserId::new(),
            role,
            status: GrantStatus::Active,
            created_at: Utc::now(),
        };
        TenantWithAccess::try_new(tenant, &grant).unwrap()
    }

    #[test]
    fn empty_ready_state_means_no_access() {
        let state = ContextState {
            status: ContextStatus::Ready,
            ..ContextState::default()
        };
        assert!(state.has_no_access());
        assert!(!ContextState::idle().has_no_access());
        assert!(!ContextState::loading().has_no_access());
    }

    #[test]
    fn upsert_replaces_by_id() {
        let main = tenant("main", Role::Volunteer);
        let mut state = ContextState::default();
        state.upsert(main.clone());
        state.upsert(tenant("north", Role::Owner));

        let promoted = AccessGrant {
            id: GrantId::new(),
            tenant_id: main.id(),
            user_id: UserId::new(),
            role: Role::Manager,
            status: GrantStatus::Active,
            created_at: Utc::now(),
        };
        state.upsert(TenantWithAccess::try_new(main.tenant().clone(), &promoted).unwrap());

        assert_eq!(state.available_tenants.len(), 2);
        assert_eq!(state.find(main.id()).map(TenantWithAccess::role), Some(Role::Manager));
    }

    #[test]
    fn current_must_be_listed() {
        let main = tenant("main", Role::Manager);
        let mut state = ContextState {
            current_tenant: Some(main.clone()),
            ..ContextState::default()
        };
        assert!(!state.is_consistent());

        state.upsert(main);
        assert!(state.is_consistent());
        assert_eq!(state.current_role(), Some(Role::Manager));
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(ContextState::loading()).unwrap();
        assert_eq!(json["status"], "loading");
        assert!(json["currentTenant"].is_null());
        assert!(json["availableTenants"].as_array().unwrap().is_empty());
    }
}

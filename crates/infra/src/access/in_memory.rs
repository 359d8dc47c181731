use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use shelf_auth::{AccessGrant, GrantStatus, Role, Tenant, TenantStatus};
use shelf_core::{GrantId, TenantId, UserId};

use super::{AccessControl, AccessQueryError, GrantRecord};

#[derive(Debug, Default)]
struct Tables {
    tenants: HashMap<TenantId, Tenant>,
    grants: Vec<AccessGrant>,
    latency: HashMap<TenantId, Duration>,
}

/// In-memory access-control store for tests/dev.
///
/// Supports outage simulation ([`set_unavailable`](Self::set_unavailable)),
/// per-tenant lookup latency, and counts queries so callers can verify that
/// re-validation really hit the store.
#[derive(Debug, Default)]
pub struct InMemoryAccessControl {
    tables: RwLock<Tables>,
    unavailable: AtomicBool,
    list_queries: AtomicUsize,
    grant_queries: AtomicUsize,
}

impl InMemoryAccessControl {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an active tenant and return it.
    pub fn add_tenant(&self, code: &str, name: &str) -> Tenant {
        let tenant = Tenant {
            id: TenantId::new(),
            code: code.to_string(),
            name: name.to_string(),
            status: TenantStatus::Active,
        };
        self.write().tenants.insert(tenant.id, tenant.clone());
        tenant
    }

    pub fn set_tenant_status(&self, tenant_id: TenantId, status: TenantStatus) {
        if let Some(t) = self.write().tenants.get_mut(&tenant_id) {
            t.status = status;
        }
    }

    /// Grant `role` now.
    pub fn grant(&self, user_id: UserId, tenant_id: TenantId, role: Role) -> GrantId {
        self.grant_at(user_id, tenant_id, role, Utc::now())
    }

    pub fn grant_at(
        &self,
        user_id: UserId,
        tenant_id: TenantId,
        role: Role,
        created_at: DateTime<Utc>,
    ) -> GrantId {
        let grant = AccessGrant {
            id: GrantId::new(),
            tenant_id,
            user_id,
            role,
            status: GrantStatus::Active,
            created_at,
        };
        let id = grant.id;
        self.write().grants.push(grant);
        id
    }

    pub fn set_grant_status(&self, user_id: UserId, tenant_id: TenantId, status: GrantStatus) {
        let mut tables = self.write();
        for g in tables
            .grants
            .iter_mut()
            .filter(|g| g.user_id == user_id && g.tenant_id == tenant_id)
        {
            g.status = status;
        }
    }

    pub fn set_role(&self, user_id: UserId, tenant_id: TenantId, role: Role) {
        let mut tables = self.write();
        for g in tables
            .grants
            .iter_mut()
            .filter(|g| g.user_id == user_id && g.tenant_id == tenant_id)
        {
            g.role = role;
        }
    }

    /// Delete the grant row entirely.
    pub fn remove_grant(&self, user_id: UserId, tenant_id: TenantId) {
        self.write()
            .grants
            .retain(|g| !(g.user_id == user_id && g.tenant_id == tenant_id));
    }

    /// Simulate a store outage (every query fails while set).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay single-grant lookups for one tenant.
    pub fn set_latency(&self, tenant_id: TenantId, latency: Duration) {
        self.write().latency.insert(tenant_id, latency);
    }

    pub fn list_queries(&self) -> usize {
        self.list_queries.load(Ordering::SeqCst)
    }

    pub fn grant_queries(&self) -> usize {
        self.grant_queries.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), AccessQueryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(AccessQueryError::Unavailable("simulated outage".to_string()))
        } else {
            Ok(())
        }
    }

    fn join(tables: &Tables, grant: &AccessGrant) -> Result<GrantRecord, AccessQueryError> {
        let tenant = tables.tenants.get(&grant.tenant_id).ok_or_else(|| {
            AccessQueryError::InvalidResponse(format!(
                "grant {} references unknown tenant {}",
                grant.id, grant.tenant_id
            ))
        })?;
        Ok(GrantRecord {
            tenant: tenant.clone(),
            grant: grant.clone(),
        })
    }
}

#[async_trait]
impl AccessControl for InMemoryAccessControl {
    async fn grants_for_user(&self, user_id: UserId) -> Result<Vec<GrantRecord>, AccessQueryError> {
        self.list_queries.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let tables = self.read();
        tables
            .grants
            .iter()
            .filter(|g| g.user_id == user_id)
            .map(|g| Self::join(&tables, g))
            .collect()
    }

    async fn grant_for(
        &self,
        user_id: UserId,
        tenant_id: TenantId,
    ) -> Result<Option<GrantRecord>, AccessQueryError> {
        self.grant_queries.fetch_add(1, Ordering::SeqCst);

        let latency = self.read().latency.get(&tenant_id).copied();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        self.check_available()?;

        let tables = self.read();
        tables
            .grants
            .iter()
            .find(|g| g.user_id == user_id && g.tenant_id == tenant_id)
            .map(|g| Self::join(&tables, g))
            .transpose()
    }
}

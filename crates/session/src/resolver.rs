//! Access Resolver: which libraries a user may act in, read from the store.

use std::sync::Arc;

use shelf_auth::{DenialReason, TenantWithAccess};
use shelf_core::{TenantId, UserId};
use shelf_infra::{AccessControl, AccessQueryError};
use tracing::debug;

/// Outcome of a single-tenant check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Granted(TenantWithAccess),
    Denied(DenialReason),
}

impl AccessDecision {
    pub fn is_granted(&self) -> bool {
        matches!(self, AccessDecision::Granted(_))
    }
}

#[derive(Clone)]
pub struct AccessResolver {
    access: Arc<dyn AccessControl>,
}

impl AccessResolver {
    pub fn new(access: Arc<dyn AccessControl>) -> Self {
        Self { access }
    }

    /// Active tenants the user holds an active grant in, oldest grant first.
    ///
    /// An error here means "unknown", never "no access".
    pub async fn list_accessible_tenants(
        &self,
        user_id: UserId,
    ) -> Result<Vec<TenantWithAccess>, AccessQueryError> {
        let records = self.access.grants_for_user(user_id).await?;

        let mut tenants: Vec<TenantWithAccess> = Vec::with_capacity(records.len());
        for record in records {
            if record.grant.user_id != user_id {
                continue;
            }
            match TenantWithAccess::try_new(record.tenant, &record.grant) {
                Ok(tenant) => tenants.push(tenant),
                Err(reason) => {
                    debug!(%user_id, tenant_id = %record.grant.tenant_id, %reason, "grant skipped");
                }
            }
        }

        tenants.sort_by(|a, b| {
            a.granted_at()
                .cmp(&b.granted_at())
                .then_with(|| a.code().cmp(b.code()))
        });
        // Duplicate grants for one tenant: keep the oldest.
        let mut seen = std::collections::HashSet::new();
        tenants.retain(|t| seen.insert(t.id()));

        Ok(tenants)
    }

    /// Re-check one tenant against the store. Always a fresh query.
    pub async fn validate_access(
        &self,
        user_id: UserId,
        tenant_id: TenantId,
    ) -> Result<AccessDecision, AccessQueryError> {
        let Some(record) = self.access.grant_for(user_id, tenant_id).await? else {
            return Ok(AccessDecision::Denied(DenialReason::NoGrant));
        };

        if record.grant.user_id != user_id || record.tenant.id != tenant_id {
            return Ok(AccessDecision::Denied(DenialReason::TenantMismatch));
        }

        Ok(match TenantWithAccess::try_new(record.tenant, &record.grant) {
            Ok(tenant) => AccessDecision::Granted(tenant),
            Err(reason) => AccessDecision::Denied(reason),
        })
    }
}

impl std::fmt::Debug for AccessResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessResolver").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use shelf_auth::{GrantStatus, Role, TenantStatus};
    use proptest::prelude::*;
    use shelf_infra::InMemoryAccessControl;

    use super::*;

    fn setup() -> (Arc<InMemoryAccessControl>, AccessResolver) {
        let store = Arc::new(InMemoryAccessControl::new());
        (store.clone(), AccessResolver::new(store))
    }

    #[tokio::test]
    async fn lists_active_tenants_oldest_grant_first() {
        let (store, resolver) = setup();
        let user = UserId::new();
        let newer = store.add_tenant("north", "North Branch");
        let older = store.add_tenant("main", "Main Library");
        let closed = store.add_tenant("annex", "Annex");
        let suspended = store.add_tenant("east", "East");
        let now = Utc::now();
        store.grant_at(user, newer.id, Role::Volunteer, now);
        store.grant_at(user, older.id, Role::Manager, now - Duration::days(30));
        store.grant_at(user, closed.id, Role::Owner, now - Duration::days(60));
        store.grant_at(user, suspended.id, Role::Owner, now - Duration::days(90));
        store.set_tenant_status(closed.id, TenantStatus::Inactive);
        store.set_grant_status(user, suspended.id, GrantStatus::Suspended);

        let tenants = resolver.list_accessible_tenants(user).await.unwrap();
        let codes: Vec<&str> = tenants.iter().map(|t| t.code()).collect();
        assert_eq!(codes, vec!["main", "north"]);
        assert_eq!(tenants[0].role(), Role::Manager);
    }

    #[tokio::test]
    async fn outage_is_an_error_not_an_empty_list() {
        let (store, resolver) = setup();
        let user = UserId::new();
        let t = store.add_tenant("main", "Main");
        store.grant(user, t.id, Role::Librarian);
        store.set_unavailable(true);

        assert!(matches!(
            resolver.list_accessible_tenants(user).await,
            Err(AccessQueryError::Unavailable(_))
        ));
        assert!(resolver.validate_access(user, t.id).await.is_err());
    }

    #[tokio::test]
    async fn validate_reports_denial_reason() {
        let (store, resolver) = setup();
        let user = UserId::new();
        let t = store.add_tenant("main", "Main");

        assert_eq!(
            resolver.validate_access(user, t.id).await.unwrap(),
            AccessDecision::Denied(DenialReason::NoGrant)
        );

        store.grant(user, t.id, Role::Librarian);
        assert!(resolver.validate_access(user, t.id).await.unwrap().is_granted());

        store.set_grant_status(user, t.id, GrantStatus::Inactive);
        assert_eq!(
            resolver.validate_access(user, t.id).await.unwrap(),
            AccessDecision::Denied(DenialReason::GrantInactive {
                status: GrantStatus::Inactive
            })
        );
    }

    #[tokio::test]
    async fn validate_always_queries_the_store() {
        let (store, resolver) = setup();
        let user = UserId::new();
        let t = store.add_tenant("main", "Main");
        store.grant(user, t.id, Role::Owner);

        resolver.validate_access(user, t.id).await.unwrap();
        resolver.validate_access(user, t.id).await.unwrap();
        assert_eq!(store.grant_queries(), 2);
    }

    proptest! {
        #[test]
        fn listing_is_filtered_and_oldest_first(
            grants in prop::collection::vec((0i64..365, any::<bool>(), any::<bool>()), 0..12)
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let (store, resolver) = setup();
            let user = UserId::new();
            let now = Utc::now();

            let mut expected = 0;
            for (i, (days_ago, tenant_active, grant_active)) in grants.iter().enumerate() {
                let t = store.add_tenant(&format!("t{i}"), "Branch");
                store.grant_at(user, t.id, Role::Librarian, now - Duration::days(*days_ago));
                if !tenant_active {
                    store.set_tenant_status(t.id, TenantStatus::Inactive);
                }
                if !grant_active {
                    store.set_grant_status(user, t.id, GrantStatus::Inactive);
                }
                if *tenant_active && *grant_active {
                    expected += 1;
                }
            }

            let listed = runtime.block_on(resolver.list_accessible_tenants(user)).unwrap();
            prop_assert_eq!(listed.len(), expected);
            prop_assert!(listed.windows(2).all(|w| w[0].granted_at() <= w[1].granted_at()));
        }
    }
}

//! Tenant Context: which library the signed-in user is acting in.
//!
//! Every mutation runs in two phases. The slow part (store queries) runs
//! unlocked. The commit takes the `binding` lock, checks that nothing newer
//! has been issued, then rebinds channels and publishes the new state.
//!
//! Two counters decide what "newer" means:
//! - `epoch` moves on sign-in, sign-out and refresh; any of these discards
//!   every older in-flight operation.
//! - `selection_seq` moves on select, switch and clear; a newer selection
//!   discards older selections, and a resolution that sees one land while it
//!   was loading keeps that selection instead of restoring its own.
//!
//! Channels of the previous tenant are always torn down before a state
//! naming a different tenant (or none) is published.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use anyhow::Context as _;
use shelf_auth::{Capability, Role, TenantWithAccess};
use shelf_core::{TenantId, User, UserId};
use shelf_events::{DomainEvent, STAFF_TABLE};
use shelf_infra::{AccessControl, PersistenceAdapter};
use shelf_realtime::{EventCallback, SubscriptionManager, callback, tenant_channel, tenant_filter};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{AccessDecision, AccessResolver, ContextError, ContextState, ContextStatus, SelectionStore};

/// A channel opened for every selected tenant: `tenant-{id}-{purpose}` on `table`.
#[derive(Clone)]
pub struct ChannelTemplate {
    pub purpose: String,
    pub table: String,
    pub callback: EventCallback,
}

impl std::fmt::Debug for ChannelTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelTemplate")
            .field("purpose", &self.purpose)
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

pub struct TenantContextBuilder {
    access: Arc<dyn AccessControl>,
    persistence: Arc<dyn PersistenceAdapter>,
    subscriptions: Arc<SubscriptionManager>,
    templates: Vec<ChannelTemplate>,
    filter_column: String,
    staff_table: Option<String>,
}

impl TenantContextBuilder {
    /// Bind `tenant-{id}-{purpose}` on `table` whenever a tenant is selected.
    pub fn channel(
        mut self,
        purpose: impl Into<String>,
        table: impl Into<String>,
        callback: EventCallback,
    ) -> Self {
        self.templates.push(ChannelTemplate {
            purpose: purpose.into(),
            table: table.into(),
            callback,
        });
        self
    }

    /// Column the feed filters on (default `tenant_id`).
    pub fn filter_column(mut self, column: impl Into<String>) -> Self {
        self.filter_column = column.into();
        self
    }

    /// Re-validate the selected tenant whenever the signed-in user's staff
    /// row changes on the default staff table.
    pub fn revalidate_on_staff_changes(self) -> Self {
        self.revalidate_on_staff_table(STAFF_TABLE)
    }

    pub fn revalidate_on_staff_table(mut self, table: impl Into<String>) -> Self {
        self.staff_table = Some(table.into());
        self
    }

    pub fn build(self) -> Arc<TenantContext> {
        Arc::new_cyclic(|weak| {
            let mut templates = self.templates;
            if let Some(table) = self.staff_table {
                templates.push(ChannelTemplate {
                    purpose: "staff".to_string(),
                    table,
                    callback: staff_watcher(weak.clone()),
                });
            }

            TenantContext {
                resolver: AccessResolver::new(self.access),
                selections: SelectionStore::new(self.persistence),
                subscriptions: self.subscriptions,
                templates,
                filter_column: self.filter_column,
                state: watch::Sender::new(ContextState::idle()),
                user: Mutex::new(None),
                epoch: AtomicU64::new(0),
                selection_seq: AtomicU64::new(0),
                binding: tokio::sync::Mutex::new(None),
            }
        })
    }
}

pub struct TenantContext {
    resolver: AccessResolver,
    selections: SelectionStore,
    subscriptions: Arc<SubscriptionManager>,
    templates: Vec<ChannelTemplate>,
    filter_column: String,
    state: watch::Sender<ContextState>,
    user: Mutex<Option<User>>,
    epoch: AtomicU64,
    selection_seq: AtomicU64,
    /// Tenant whose channels are currently bound. Held for every commit.
    binding: tokio::sync::Mutex<Option<TenantId>>,
}

impl TenantContext {
    pub fn builder(
        access: Arc<dyn AccessControl>,
        persistence: Arc<dyn PersistenceAdapter>,
        subscriptions: Arc<SubscriptionManager>,
    ) -> TenantContextBuilder {
        TenantContextBuilder {
            access,
            persistence,
            subscriptions,
            templates: Vec::new(),
            filter_column: "tenant_id".to_string(),
            staff_table: None,
        }
    }

    // ---- observation --------------------------------------------------

    pub fn state(&self) -> ContextState {
        self.state.borrow().clone()
    }

    /// Receive every published [`ContextState`].
    pub fn watch(&self) -> watch::Receiver<ContextState> {
        self.state.subscribe()
    }

    pub fn current_tenant(&self) -> Option<TenantWithAccess> {
        self.state.borrow().current_tenant.clone()
    }

    pub fn current_role(&self) -> Option<Role> {
        self.state.borrow().current_role()
    }

    pub fn current_user(&self) -> Option<User> {
        *self.user.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// False when no tenant is selected.
    pub fn can(&self, capability: Capability) -> bool {
        shelf_auth::can(self.current_role(), capability)
    }

    pub fn has_minimum_role(&self, minimum: Role) -> bool {
        self.current_role()
            .is_some_and(|role| shelf_auth::has_minimum_role(role, minimum))
    }

    pub fn has_any_role(&self, allowed: &[Role]) -> bool {
        self.current_role()
            .is_some_and(|role| shelf_auth::has_any_role(role, allowed))
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionManager> {
        &self.subscriptions
    }

    pub fn templates(&self) -> &[ChannelTemplate] {
        &self.templates
    }

    // ---- operations ---------------------------------------------------

    /// React to the auth collaborator: `Some` resolves, `None` signs out.
    ///
    /// A repeat notification for a user whose context is already ready is a
    /// no-op; use [`refresh`](Self::refresh) to force a reload.
    pub async fn handle_auth_change(&self, user: Option<User>) -> Result<(), ContextError> {
        let Some(user) = user else {
            self.sign_out().await;
            return Ok(());
        };

        let same_user = self.current_user() == Some(user);
        if same_user && self.state.borrow().is_ready() {
            debug!(user_id = %user.id, "auth change for current user ignored");
            return Ok(());
        }
        self.resolve(user, !same_user).await
    }

    /// Re-run resolution for the signed-in user, keeping the current tenant
    /// if it is still accessible.
    pub async fn refresh(&self) -> Result<(), ContextError> {
        let user = self.require_user()?;
        self.resolve(user, false).await
    }

    /// Select a tenant from `available_tenants`. No store query.
    pub async fn select(&self, tenant_id: TenantId) -> Result<TenantWithAccess, ContextError> {
        let user = self.require_user()?;
        let epoch = self.epoch.load(Ordering::SeqCst);
        let seq = self.selection_seq.fetch_add(1, Ordering::SeqCst) + 1;

        let tenant = self.state.borrow().find(tenant_id).cloned();
        let tenant = tenant.ok_or(ContextError::NotAvailable(tenant_id))?;
        self.commit_selection(user, epoch, seq, tenant).await
    }

    /// Switch to a tenant after a fresh access check.
    ///
    /// On denial nothing changes and the denial is returned.
    pub async fn switch_to(&self, tenant_id: TenantId) -> Result<TenantWithAccess, ContextError> {
        let user = self.require_user()?;
        let epoch = self.epoch.load(Ordering::SeqCst);
        let seq = self.selection_seq.fetch_add(1, Ordering::SeqCst) + 1;

        match self.resolver.validate_access(user.id, tenant_id).await {
            Ok(AccessDecision::Granted(tenant)) => {
                self.commit_selection(user, epoch, seq, tenant).await
            }
            Ok(AccessDecision::Denied(reason)) => {
                warn!(user_id = %user.id, %tenant_id, %reason, "library switch denied");
                Err(ContextError::AccessDenied { tenant_id, reason })
            }
            Err(err) => {
                warn!(user_id = %user.id, %tenant_id, error = %err, "library switch could not be validated");
                Err(err.into())
            }
        }
    }

    /// Drop the current tenant and forget the persisted selection.
    pub async fn clear(&self) -> Result<(), ContextError> {
        let user = self.current_user();
        let seq = self.selection_seq.fetch_add(1, Ordering::SeqCst) + 1;

        let mut binding = self.binding.lock().await;
        if self.selection_seq.load(Ordering::SeqCst) != seq {
            return Err(ContextError::Superseded);
        }

        let mut next = self.state();
        next.current_tenant = None;
        self.apply(&mut binding, next).await;

        if let Some(user) = user {
            self.selections.forget(user.id).await?;
            info!(user_id = %user.id, "library selection cleared");
        }
        Ok(())
    }

    /// Re-check the selected tenant; on denial it is dropped like a revocation.
    ///
    /// Returns the denial as [`ContextError::AccessDenied`] after the context
    /// has been cleared. `Ok` when nothing is selected.
    pub async fn revalidate_current(&self) -> Result<(), ContextError> {
        let user = self.require_user()?;
        let current = self.current_tenant();
        let Some(previous) = current else {
            return Ok(());
        };
        let tenant_id = previous.id();
        let epoch = self.epoch.load(Ordering::SeqCst);
        let seq = self.selection_seq.load(Ordering::SeqCst);

        let decision = self.resolver.validate_access(user.id, tenant_id).await?;

        let mut binding = self.binding.lock().await;
        if self.epoch.load(Ordering::SeqCst) != epoch
            || self.selection_seq.load(Ordering::SeqCst) != seq
            || self.state.borrow().current_tenant_id() != Some(tenant_id)
        {
            return Err(ContextError::Superseded);
        }

        match decision {
            AccessDecision::Granted(fresh) => {
                if fresh.role() != previous.role() {
                    info!(
                        user_id = %user.id,
                        %tenant_id,
                        from = %previous.role(),
                        to = %fresh.role(),
                        "role changed in selected library"
                    );
                }
                let mut next = self.state();
                next.upsert(fresh.clone());
                next.current_tenant = Some(fresh);
                self.apply(&mut binding, next).await;
                Ok(())
            }
            AccessDecision::Denied(reason) => {
                warn!(user_id = %user.id, %tenant_id, %reason, "access to selected library revoked");
                let mut next = self.state();
                next.available_tenants.retain(|t| t.id() != tenant_id);
                next.current_tenant = None;
                self.apply(&mut binding, next).await;

                if let Err(err) = self.selections.forget(user.id).await {
                    warn!(user_id = %user.id, error = %err, "revoked selection not deleted");
                }
                Err(ContextError::AccessDenied { tenant_id, reason })
            }
        }
    }

    /// Drive [`handle_auth_change`](Self::handle_auth_change) from the auth
    /// collaborator. A newer auth value cancels an in-flight resolution.
    pub fn spawn_auth_listener(
        self: &Arc<Self>,
        mut auth: watch::Receiver<Option<User>>,
    ) -> JoinHandle<()> {
        let ctx = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let user = *auth.borrow_and_update();
                let handled = ctx.handle_auth_change(user);
                tokio::pin!(handled);

                let sender_alive = tokio::select! {
                    result = &mut handled => {
                        log_auth_result(result);
                        auth.changed().await.is_ok()
                    }
                    changed = auth.changed() => match changed {
                        Ok(()) => {
                            debug!("auth changed during resolution; restarting");
                            true
                        }
                        Err(_) => {
                            log_auth_result(handled.await);
                            false
                        }
                    },
                };

                if !sender_alive {
                    debug!("auth source closed; listener stopped");
                    break;
                }
            }
        })
    }

    // ---- internals ----------------------------------------------------

    fn require_user(&self) -> Result<User, ContextError> {
        self.current_user().ok_or(ContextError::NoUser)
    }

    fn set_user(&self, user: Option<User>) -> Option<User> {
        let mut guard = self.user.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, user)
    }

    async fn sign_out(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.selection_seq.fetch_add(1, Ordering::SeqCst);

        let mut binding = self.binding.lock().await;
        let previous = self.set_user(None);
        self.apply(&mut binding, ContextState::idle()).await;

        if let Some(user) = previous {
            if let Err(err) = self.selections.forget(user.id).await {
                warn!(user_id = %user.id, error = %err, "selection not deleted on sign-out");
            }
            info!(user_id = %user.id, "signed out; tenant context cleared");
        }
    }

    async fn resolve(&self, user: User, reset: bool) -> Result<(), ContextError> {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let selection = self.selection_seq.load(Ordering::SeqCst);
        info!(user_id = %user.id, reset, "resolving tenant context");

        {
            let mut binding = self.binding.lock().await;
            if self.epoch.load(Ordering::SeqCst) != epoch {
                return Err(ContextError::Superseded);
            }
            if reset {
                self.set_user(Some(user));
                self.apply(&mut binding, ContextState::loading()).await;
            } else {
                self.state.send_modify(|s| {
                    s.status = ContextStatus::Loading;
                    s.error = None;
                });
            }
        }

        let tenants = match self.resolver.list_accessible_tenants(user.id).await {
            Ok(tenants) => tenants,
            Err(err) => {
                let _binding = self.binding.lock().await;
                if self.epoch.load(Ordering::SeqCst) != epoch {
                    return Err(ContextError::Superseded);
                }
                error!(user_id = %user.id, error = %err, "tenant resolution failed");
                self.state.send_modify(|s| {
                    s.status = ContextStatus::Error;
                    s.error = Some(err.to_string());
                });
                return Err(err.into());
            }
        };

        let current = self.state.borrow().current_tenant_id();
        let remembered = match current {
            Some(id) => Some(id),
            None => match self.selections.load(user.id).await {
                Ok(id) => id,
                Err(err) => {
                    warn!(user_id = %user.id, error = %err, "persisted selection unreadable");
                    None
                }
            },
        };

        let mut binding = self.binding.lock().await;
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return Err(ContextError::Superseded);
        }

        let mut next = ContextState {
            current_tenant: None,
            available_tenants: tenants,
            status: ContextStatus::Ready,
            error: None,
        };
        let mut forget = false;
        let mut persist = None;

        if self.selection_seq.load(Ordering::SeqCst) != selection {
            // A selection landed while loading; keep it.
            let chosen = self.current_tenant();
            if let Some(chosen) = chosen {
                let fresh = next.find(chosen.id()).cloned().unwrap_or(chosen);
                next.upsert(fresh.clone());
                next.current_tenant = Some(fresh);
            }
        } else {
            match remembered {
                Some(id) => match next.find(id).cloned() {
                    Some(tenant) => next.current_tenant = Some(tenant),
                    None => {
                        info!(user_id = %user.id, tenant_id = %id, "remembered library no longer accessible");
                        forget = true;
                    }
                },
                None if next.available_tenants.len() == 1 => {
                    let only = next.available_tenants[0].clone();
                    persist = Some(only.id());
                    next.current_tenant = Some(only);
                }
                None => {}
            }
        }

        let available = next.available_tenants.len();
        let selected = next.current_tenant_id();
        self.apply(&mut binding, next).await;

        if forget {
            if let Err(err) = self.selections.forget(user.id).await {
                warn!(user_id = %user.id, error = %err, "stale selection not deleted");
            }
        }
        if let Some(tenant_id) = persist {
            if let Err(err) = self.selections.save(user.id, tenant_id).await {
                warn!(user_id = %user.id, %tenant_id, error = %err, "auto-selection not persisted");
            }
        }

        info!(user_id = %user.id, available, selected = ?selected, "tenant context ready");
        Ok(())
    }

    async fn commit_selection(
        &self,
        user: User,
        epoch: u64,
        seq: u64,
        tenant: TenantWithAccess,
    ) -> Result<TenantWithAccess, ContextError> {
        let mut binding = self.binding.lock().await;
        if self.epoch.load(Ordering::SeqCst) != epoch
            || self.selection_seq.load(Ordering::SeqCst) != seq
        {
            debug!(tenant_id = %tenant.id(), "selection superseded");
            return Err(ContextError::Superseded);
        }

        let mut next = self.state();
        next.upsert(tenant.clone());
        next.current_tenant = Some(tenant.clone());
        self.apply(&mut binding, next).await;

        if let Err(err) = self.selections.save(user.id, tenant.id()).await {
            warn!(user_id = %user.id, tenant_id = %tenant.id(), error = %err, "selection not persisted");
        }
        info!(user_id = %user.id, tenant_id = %tenant.id(), role = %tenant.role(), "library selected");
        Ok(tenant)
    }

    /// Publish `next`, rebinding channels if the tenant changes.
    async fn apply(&self, binding: &mut Option<TenantId>, next: ContextState) {
        debug_assert!(next.is_consistent());
        let target = next.current_tenant.clone();
        let target_id = target.as_ref().map(TenantWithAccess::id);

        if target_id.is_some() && *binding == target_id {
            self.state.send_replace(next);
            return;
        }

        self.subscriptions.disconnect_all().await;
        *binding = None;
        self.state.send_replace(next);

        if let Some(tenant) = target {
            self.bind_channels(&tenant).await;
            *binding = Some(tenant.id());
        }
    }

    async fn bind_channels(&self, tenant: &TenantWithAccess) {
        for template in &self.templates {
            let name = tenant_channel(tenant.id(), &template.purpose);
            let filter = tenant_filter(&self.filter_column, tenant.id());
            let outcome = self
                .subscriptions
                .subscribe(
                    name.clone(),
                    template.table.clone(),
                    filter,
                    Arc::clone(&template.callback),
                )
                .await;
            if !outcome.is_subscribed() {
                warn!(channel = %name, tenant_id = %tenant.id(), ?outcome, "tenant channel not bound");
            }
        }
    }
}

impl std::fmt::Debug for TenantContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantContext")
            .field("state", &*self.state.borrow())
            .field("templates", &self.templates)
            .finish_non_exhaustive()
    }
}

fn log_auth_result(result: Result<(), ContextError>) {
    match result {
        Ok(()) | Err(ContextError::Superseded) => {}
        Err(err) => warn!(error = %err, "auth change not fully applied"),
    }
}

/// Revalidate when the signed-in user's own staff row changes.
fn staff_watcher(ctx: Weak<TenantContext>) -> EventCallback {
    callback(move |event| {
        let DomainEvent::StaffChanged(change) = event else {
            return Ok(());
        };
        let Some(ctx) = ctx.upgrade() else {
            return Ok(());
        };
        let Some(user) = ctx.current_user() else {
            return Ok(());
        };
        let changed = match change.user_id.as_deref().map(str::parse::<UserId>) {
            Some(Ok(id)) => Some(id),
            Some(Err(err)) => {
                debug!(error = %err, "staff row with unparseable user id ignored");
                None
            }
            None => None,
        };
        if changed != Some(user.id) {
            return Ok(());
        }

        debug!(user_id = %user.id, revocation = change.is_revocation(), "own staff row changed");
        let runtime = tokio::runtime::Handle::try_current()
            .context("no runtime available to revalidate access")?;
        runtime.spawn(async move {
            match ctx.revalidate_current().await {
                Ok(()) | Err(ContextError::AccessDenied { .. }) | Err(ContextError::Superseded) => {}
                Err(err) => warn!(error = %err, "revalidation after staff change failed"),
            }
        });
        Ok(())
    })
}

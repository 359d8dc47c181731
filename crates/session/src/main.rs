//! Walks one staff member through sign-in, a library switch, live inventory
//! updates and a revocation, using in-memory collaborators.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use shelf_auth::{Capability, GrantStatus, Role};
use shelf_core::{User, UserId};
use shelf_events::{ChangeRecord, EventNormalizer, InMemoryChangeFeed, Operation, STAFF_TABLE};
use shelf_infra::{InMemoryAccessControl, PersistenceAdapter, SqlitePersistence};
use shelf_realtime::{SubscriptionManager, callback};
use shelf_session::{ContextStatus, ShelfConfig, TenantContext};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    shelf_observability::init();

    let config = ShelfConfig::from_env();
    let persistence: Arc<dyn PersistenceAdapter> = match config.selection_db_path() {
        Ok(path) => {
            tracing::info!(path = %path.display(), "using selection store");
            Arc::new(SqlitePersistence::open(path))
        }
        Err(err) => {
            tracing::warn!(error = %err, "no data directory; selections kept in memory");
            Arc::new(SqlitePersistence::in_memory())
        }
    };

    let access = Arc::new(InMemoryAccessControl::new());
    let feed = Arc::new(InMemoryChangeFeed::new());
    let subscriptions = Arc::new(SubscriptionManager::new(
        feed.clone(),
        EventNormalizer::with_defaults().with_table(
            config.inventory_table.clone(),
            shelf_events::normalizer::inventory_changed,
        ),
        config.retry_policy(),
    ));

    let user = User::new(UserId::new());
    let main_branch = access.add_tenant("main", "Main Library");
    let north = access.add_tenant("north", "North Branch");
    access.grant(user.id, main_branch.id, Role::Librarian);
    access.grant(user.id, north.id, Role::Manager);

    let ctx = TenantContext::builder(access.clone(), persistence, subscriptions)
        .filter_column(config.tenant_filter_column.clone())
        .channel(
            "inventory",
            config.inventory_table.clone(),
            callback(|event| {
                tracing::info!(event = %serde_json::to_string(event)?, "inventory event");
                Ok(())
            }),
        )
        .revalidate_on_staff_changes()
        .build();

    let (auth_tx, auth_rx) = watch::channel(None);
    let listener = ctx.spawn_auth_listener(auth_rx);
    let mut state = ctx.watch();

    auth_tx.send(Some(user))?;
    state.wait_for(|s| s.status == ContextStatus::Ready).await?;
    tracing::info!(libraries = ctx.state().available_tenants.len(), "signed in");

    let selected = ctx.switch_to(main_branch.id).await?;
    tracing::info!(
        library = selected.name(),
        can_manage_books = ctx.can(Capability::ManageBooks),
        can_manage_staff = ctx.can(Capability::ManageStaff),
        "switched"
    );

    let tenant = main_branch.id.to_string();
    feed.publish(ChangeRecord::new(
        config.inventory_table.clone(),
        Operation::Update,
        Some(json!({ "status": "available", config.tenant_filter_column.clone(): tenant })),
        Some(json!({
            "status": "checked_out",
            config.tenant_filter_column.clone(): tenant,
            "book_edition_id": "demo-edition",
            "current_borrower_id": "demo-member",
        })),
    ));
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The library suspends this staff member; the staff channel notices.
    access.set_grant_status(user.id, main_branch.id, GrantStatus::Suspended);
    feed.publish(ChangeRecord::new(
        STAFF_TABLE,
        Operation::Update,
        None,
        Some(json!({
            "user_id": user.id.to_string(),
            config.tenant_filter_column.clone(): tenant,
            "role": "librarian",
            "status": "suspended",
        })),
    ));
    state.wait_for(|s| s.current_tenant.is_none()).await?;
    tracing::info!(libraries = ctx.state().available_tenants.len(), "access revoked; selection cleared");

    auth_tx.send(None)?;
    state.wait_for(|s| s.status == ContextStatus::Idle).await?;
    drop(auth_tx);
    listener.await?;

    tracing::info!(connected = ctx.subscriptions().is_connected(), "signed out");
    Ok(())
}

//! Remembered tenant selection, one entry per user.
//!
//! Key `selected_tenant:{userId}`, value `{"tenantId": "<uuid>"}`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use shelf_core::{TenantId, UserId};
use shelf_infra::{PersistenceAdapter, PersistenceError};
use thiserror::Error;
use tracing::{debug, warn};

pub const KEY_PREFIX: &str = "selected_tenant:";

pub fn selection_key(user_id: UserId) -> String {
    format!("{KEY_PREFIX}{user_id}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSelection {
    pub tenant_id: TenantId,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SelectionError {
    #[error("malformed persisted selection: {0}")]
    Malformed(String),
}

impl PersistedSelection {
    pub fn encode(&self) -> String {
        // Only a uuid newtype inside; cannot fail.
        serde_json::json!({ "tenantId": self.tenant_id }).to_string()
    }

    pub fn decode(raw: &str) -> Result<Self, SelectionError> {
        serde_json::from_str(raw).map_err(|e| SelectionError::Malformed(e.to_string()))
    }
}

/// Reads and writes [`PersistedSelection`]s through a [`PersistenceAdapter`].
#[derive(Clone)]
pub struct SelectionStore {
    adapter: Arc<dyn PersistenceAdapter>,
}

impl SelectionStore {
    pub fn new(adapter: Arc<dyn PersistenceAdapter>) -> Self {
        Self { adapter }
    }

    /// The remembered tenant, if any.
    ///
    /// A malformed entry is logged, deleted and reported as absent.
    pub async fn load(&self, user_id: UserId) -> Result<Option<TenantId>, PersistenceError> {
        let key = selection_key(user_id);
        let Some(raw) = self.adapter.get(&key).await? else {
            return Ok(None);
        };

        match PersistedSelection::decode(&raw) {
            Ok(selection) => Ok(Some(selection.tenant_id)),
            Err(err) => {
                warn!(%user_id, error = %err, "discarding persisted selection");
                self.adapter.delete(&key).await?;
                Ok(None)
            }
        }
    }

    pub async fn save(&self, user_id: UserId, tenant_id: TenantId) -> Result<(), PersistenceError> {
        let value = PersistedSelection { tenant_id }.encode();
        self.adapter.set(&selection_key(user_id), &value).await?;
        debug!(%user_id, %tenant_id, "selection persisted");
        Ok(())
    }

    pub async fn forget(&self, user_id: UserId) -> Result<(), PersistenceError> {
        self.adapter.delete(&selection_key(user_id)).await
    }
}

impl std::fmt::Debug for SelectionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectionStore").finish_non_exhaustive()
    }
}

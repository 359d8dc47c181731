use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::{ChangeRecord, Operation};

/// Typed event handed to subscription callbacks.
///
/// One per raw record. Events are facts: nothing downstream mutates them.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    InventoryChanged(InventoryChanged),
    StaffChanged(StaffChanged),
    /// Record from a table with no registered transform, unchanged.
    Passthrough(ChangeRecord),
}

impl DomainEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::InventoryChanged(_) => "inventory_changed",
            DomainEvent::StaffChanged(_) => "staff_changed",
            DomainEvent::Passthrough(_) => "passthrough",
        }
    }

    pub fn operation(&self) -> Operation {
        match self {
            DomainEvent::InventoryChanged(e) => e.operation,
            DomainEvent::StaffChanged(e) => e.operation,
            DomainEvent::Passthrough(r) => r.operation,
        }
    }

    /// Tenant the row belongs to, when the row says so.
    pub fn tenant_id(&self) -> Option<&str> {
        match self {
            DomainEvent::InventoryChanged(e) => e.tenant_id.as_deref(),
            DomainEvent::StaffChanged(e) => e.tenant_id.as_deref(),
            DomainEvent::Passthrough(_) => None,
        }
    }
}

/// A physical copy changed availability (checked out, returned, added, removed).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InventoryChanged {
    pub operation: Operation,
    pub book_id: Option<String>,
    pub tenant_id: Option<String>,
    pub status: Option<String>,
    pub borrower_id: Option<String>,
    /// Prior row image; only set for updates.
    pub previous_data: Option<JsonValue>,
    pub timestamp: DateTime<Utc>,
}

/// A staff grant changed (role change, suspension, removal).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StaffChanged {
    pub operation: Operation,
    pub user_id: Option<String>,
    pub tenant_id: Option<String>,
    pub role: Option<String>,
    pub status: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl StaffChanged {
    /// True when the row no longer grants access (deleted or not active).
    pub fn is_revocation(&self) -> bool {
        self.operation == Operation::Delete
            || self.status.as_deref().is_some_and(|s| s != "active")
    }
}

//! Table-keyed transforms from raw change records to domain events.
//!
//! Lookups that miss fall back to [`DomainEvent::Passthrough`]; normalisation
//! never fails.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::{ChangeRecord, DomainEvent, InventoryChanged, Operation, StaffChanged};

/// Default table holding physical book copies.
pub const INVENTORY_TABLE: &str = "book_copies";

/// Default table holding staff grants.
pub const STAFF_TABLE: &str = "library_staff";

/// Pure transform for one table.
pub type Transform = fn(&ChangeRecord, DateTime<Utc>) -> DomainEvent;

#[derive(Debug, Clone, Default)]
pub struct EventNormalizer {
    transforms: HashMap<String, Transform>,
}

impl EventNormalizer {
    /// Empty registry (every table passes through).
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the inventory and staff transforms on their default tables.
    pub fn with_defaults() -> Self {
        Self::new()
            .with_table(INVENTORY_TABLE, inventory_changed)
            .with_table(STAFF_TABLE, staff_changed)
    }

    pub fn with_table(mut self, table: impl Into<String>, transform: Transform) -> Self {
        self.register(table, transform);
        self
    }

    pub fn register(&mut self, table: impl Into<String>, transform: Transform) {
        self.transforms.insert(table.into(), transform);
    }

    pub fn handles(&self, table: &str) -> bool {
        self.transforms.contains_key(table)
    }

    pub fn normalize(&self, record: ChangeRecord) -> DomainEvent {
        self.normalize_at(record, Utc::now())
    }

    pub fn normalize_at(&self, record: ChangeRecord, now: DateTime<Utc>) -> DomainEvent {
        match self.transforms.get(&record.table) {
            Some(transform) => transform(&record, now),
            None => DomainEvent::Passthrough(record),
        }
    }
}

/// `book_copies` rows → [`InventoryChanged`].
pub fn inventory_changed(record: &ChangeRecord, now: DateTime<Utc>) -> DomainEvent {
    let previous_data = match record.operation {
        Operation::Update => record.before.clone(),
        Operation::Insert | Operation::Delete => None,
    };

    DomainEvent::InventoryChanged(InventoryChanged {
        operation: record.operation,
        book_id: record.text(&["book_edition_id", "edition_id", "editionId"]),
        tenant_id: record.text(&["tenant_id", "library_id", "tenantId"]),
        status: record.text(&["status", "availability.status"]),
        borrower_id: record.text(&[
            "current_borrower_id",
            "borrower_id",
            "availability.borrowerId",
        ]),
        previous_data,
        timestamp: now,
    })
}

/// `library_staff` rows → [`StaffChanged`].
pub fn staff_changed(record: &ChangeRecord, now: DateTime<Utc>) -> DomainEvent {
    DomainEvent::StaffChanged(StaffChanged {
        operation: record.operation,
        user_id: record.text(&["user_id", "userId"]),
        tenant_id: record.text(&["tenant_id", "library_id", "tenantId"]),
        role: record.text(&["role"]),
        status: record.text(&["status", "grant_status"]),
        timestamp: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn update_keeps_previous_snapshot() {
        let normalizer = EventNormalizer::with_defaults();
        let record = ChangeRecord::new(
            "book_copies",
            Operation::Update,
            Some(json!({"status": "available"})),
            Some(json!({"status": "checked_out", "tenant_id": "T1"})),
        );
        let now = Utc::now();

        let DomainEvent::InventoryChanged(e) = normalizer.normalize_at(record, now) else {
            panic!("expected InventoryChanged");
        };
        assert_eq!(e.operation, Operation::Update);
        assert_eq!(e.tenant_id.as_deref(), Some("T1"));
        assert_eq!(e.status.as_deref(), Some("checked_out"));
        assert_eq!(e.previous_data, Some(json!({"status": "available"})));
        assert_eq!(e.timestamp, now);
    }

    #[test]
    fn camel_case_rows_are_understood() {
        let normalizer = EventNormalizer::with_defaults();
        let record = ChangeRecord::new(
            "book_copies",
            Operation::Insert,
            None,
            Some(json!({
                "editionId": "E9",
                "tenantId": "T2",
                "availability": {"status": "checked_out", "borrowerId": "M4"}
            })),
        );

        let DomainEvent::InventoryChanged(e) = normalizer.normalize(record) else {
            panic!("expected InventoryChanged");
        };
        assert_eq!(e.book_id.as_deref(), Some("E9"));
        assert_eq!(e.tenant_id.as_deref(), Some("T2"));
        assert_eq!(e.status.as_deref(), Some("checked_out"));
        assert_eq!(e.borrower_id.as_deref(), Some("M4"));
        assert_eq!(e.previous_data, None);
    }

    #[test]
    fn delete_reads_the_before_image() {
        let normalizer = EventNormalizer::with_defaults();
        let record = ChangeRecord::new(
            "book_copies",
            Operation::Delete,
            Some(json!({"book_edition_id": "E1", "tenant_id": "T1", "status": "lost"})),
            None,
        );

        let DomainEvent::InventoryChanged(e) = normalizer.normalize(record) else {
            panic!("expected InventoryChanged");
        };
        assert_eq!(e.book_id.as_deref(), Some("E1"));
        assert_eq!(e.status.as_deref(), Some("lost"));
        assert_eq!(e.previous_data, None);
    }

    #[test]
    fn unknown_table_passes_through() {
        let normalizer = EventNormalizer::with_defaults();
        let record = ChangeRecord::new("members", Operation::Insert, None, Some(json!({"x": 1})));
        assert_eq!(
            normalizer.normalize(record.clone()),
            DomainEvent::Passthrough(record)
        );
    }

    #[test]
    fn malformed_rows_do_not_panic() {
        let normalizer = EventNormalizer::with_defaults();
        let record = ChangeRecord::new("book_copies", Operation::Insert, None, Some(json!([1, 2])));
        let DomainEvent::InventoryChanged(e) = normalizer.normalize(record) else {
            panic!("expected InventoryChanged");
        };
        assert_eq!(e.book_id, None);
        assert_eq!(e.tenant_id, None);
    }

    #[test]
    fn staff_removal_is_a_revocation() {
        let normalizer = EventNormalizer::with_defaults();
        let removed = ChangeRecord::new(
            STAFF_TABLE,
            Operation::Delete,
            Some(json!({"user_id": "U1", "library_id": "T1", "role": "librarian"})),
            None,
        );
        let suspended = ChangeRecord::new(
            STAFF_TABLE,
            Operation::Update,
            None,
            Some(json!({"user_id": "U1", "tenant_id": "T1", "status": "suspended"})),
        );

        for record in [removed, suspended] {
            let DomainEvent::StaffChanged(e) = normalizer.normalize(record) else {
                panic!("expected StaffChanged");
            };
            assert_eq!(e.user_id.as_deref(), Some("U1"));
            assert_eq!(e.tenant_id.as_deref(), Some("T1"));
            assert!(e.is_revocation());
        }
    }
}

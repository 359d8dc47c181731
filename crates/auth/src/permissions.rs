//! Capability checks derived from the role held in the active tenant.
//!
//! Two primitives:
//! - [`has_any_role`]: exact membership, no hierarchy
//! - [`has_minimum_role`]: hierarchy-aware rank comparison
//!
//! Every named [`Capability`] is one of the two. [`can`] takes an `Option<Role>`
//! so callers with no tenant selected simply get `false`.

use serde::{Deserialize, Serialize};

use crate::Role;

/// Exact-membership check: `current` must be one of `allowed`.
pub fn has_any_role(current: Role, allowed: &[Role]) -> bool {
    allowed.contains(&current)
}

/// Hierarchy-aware check: `current` ranks at or above `minimum`.
pub fn has_minimum_role(current: Role, minimum: Role) -> bool {
    current.rank() >= minimum.rank()
}

/// How a capability is granted.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RoleRequirement {
    AtLeast(Role),
    AnyOf(&'static [Role]),
}

impl RoleRequirement {
    pub fn is_met_by(self, role: Role) -> bool {
        match self {
            RoleRequirement::AtLeast(min) => has_minimum_role(role, min),
            RoleRequirement::AnyOf(allowed) => has_any_role(role, allowed),
        }
    }
}

/// Named staff capabilities within a library.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Check books in and out at the desk.
    CheckoutBooks,
    /// Add, edit and remove catalog entries.
    ManageBooks,
    /// Add and retire physical copies.
    ManageCopies,
    ManageMembers,
    ManageStaff,
    ViewReports,
    /// Edit library settings.
    ManageLibrary,
    DeleteLibrary,
}

impl Capability {
    pub fn requirement(self) -> RoleRequirement {
        match self {
            Capability::CheckoutBooks => RoleRequirement::AtLeast(Role::Volunteer),
            Capability::ManageBooks
            | Capability::ManageCopies
            | Capability::ManageMembers => RoleRequirement::AtLeast(Role::Librarian),
            Capability::ManageStaff | Capability::ViewReports => {
                RoleRequirement::AtLeast(Role::Manager)
            }
            Capability::ManageLibrary => RoleRequirement::AnyOf(&[Role::Manager, Role::Owner]),
            Capability::DeleteLibrary => RoleRequirement::AnyOf(&[Role::Owner]),
        }
    }
}

/// Whether `role` (the role in the active tenant, if any) grants `capability`.
pub fn can(role: Option<Role>, capability: Capability) -> bool {
    role.is_some_and(|r| capability.requirement().is_met_by(r))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn any_role() -> impl Strategy<Value = Role> {
        prop::sample::select(Role::HIERARCHY.to_vec())
    }

    #[test]
    fn any_role_ignores_hierarchy() {
        assert!(has_any_role(Role::Volunteer, &[Role::Volunteer, Role::Owner]));
        assert!(!has_any_role(Role::Manager, &[Role::Volunteer, Role::Owner]));
        assert!(!has_any_role(Role::Owner, &[]));
    }

    #[test]
    fn minimum_role_uses_ranks() {
        assert!(has_minimum_role(Role::Owner, Role::Librarian));
        assert!(has_minimum_role(Role::Librarian, Role::Librarian));
        assert!(!has_minimum_role(Role::Volunteer, Role::Librarian));
    }

    #[test]
    fn no_tenant_means_no_capability() {
        assert!(!can(None, Capability::CheckoutBooks));
        assert!(!can(None, Capability::DeleteLibrary));
    }

    #[test]
    fn capability_table() {
        assert!(can(Some(Role::Volunteer), Capability::CheckoutBooks));
        assert!(!can(Some(Role::Volunteer), Capability::ManageBooks));
        assert!(can(Some(Role::Librarian), Capability::ManageMembers));
        assert!(!can(Some(Role::Librarian), Capability::ViewReports));
        assert!(can(Some(Role::Manager), Capability::ManageLibrary));
        assert!(!can(Some(Role::Manager), Capability::DeleteLibrary));
        assert!(can(Some(Role::Owner), Capability::DeleteLibrary));
    }

    proptest! {
        #[test]
        fn minimum_role_is_reflexive(role in any_role()) {
            prop_assert!(has_minimum_role(role, role));
        }

        #[test]
        fn minimum_role_is_transitive(a in any_role(), b in any_role(), c in any_role()) {
            if has_minimum_role(a, b) && has_minimum_role(b, c) {
                prop_assert!(has_minimum_role(a, c));
            }
        }

        #[test]
        fn minimum_role_is_total(a in any_role(), b in any_role()) {
            prop_assert!(has_minimum_role(a, b) || has_minimum_role(b, a));
        }

        #[test]
        fn owner_has_every_hierarchical_capability(min in any_role()) {
            prop_assert!(RoleRequirement::AtLeast(min).is_met_by(Role::Owner));
        }
    }
}

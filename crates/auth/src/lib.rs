//! `shelf-auth`: role hierarchy and tenant membership (pure, no IO).
//!
//! The row-level access store lives behind a collaborator trait in
//! `shelf-infra`; this crate only models what it returns and how roles map to
//! capabilities.

pub mod membership;
pub mod permissions;
pub mod roles;

pub use membership::{AccessGrant, DenialReason, GrantStatus, Tenant, TenantStatus, TenantWithAccess};
pub use permissions::{Capability, RoleRequirement, can, has_any_role, has_minimum_role};
pub use roles::{Role, UnknownRole};

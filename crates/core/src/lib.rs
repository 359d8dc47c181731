//! `shelf-core`: identity and error primitives shared by every shelf crate.
//!
//! Nothing in here performs IO.

pub mod error;
pub mod id;
pub mod user;

pub use error::DomainError;
pub use id::{GrantId, TenantId, UserId};
pub use user::User;

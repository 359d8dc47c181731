//! Authenticated user identity.

use serde::{Deserialize, Serialize};

use crate::UserId;

/// An authenticated user as reported by the auth collaborator.
///
/// Read-only here; the session layer only ever needs the id.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
}

impl User {
    pub fn new(id: UserId) -> Self {
        Self { id }
    }
}

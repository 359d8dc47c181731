use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Role a user holds within one tenant.
///
/// The hierarchy is fixed, low to high: `volunteer < librarian < manager < owner`.
/// Comparisons go through [`Role::rank`], never through declaration order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Volunteer,
    Librarian,
    Manager,
    Owner,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown role '{0}'")]
pub struct UnknownRole(pub String);

impl Role {
    /// Every role, ordered from least to most privileged.
    pub const HIERARCHY: [Role; 4] = [Role::Volunteer, Role::Librarian, Role::Manager, Role::Owner];

    /// Position of this role in [`Role::HIERARCHY`].
    pub fn rank(self) -> usize {
        Self::HIERARCHY
            .iter()
            .position(|r| *r == self)
            .unwrap_or_default()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Volunteer => "volunteer",
            Role::Librarian => "librarian",
            Role::Manager => "manager",
            Role::Owner => "owner",
        }
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::HIERARCHY
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownRole(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranks_follow_hierarchy() {
        assert_eq!(Role::Volunteer.rank(), 0);
        assert_eq!(Role::Librarian.rank(), 1);
        assert_eq!(Role::Manager.rank(), 2);
        assert_eq!(Role::Owner.rank(), 3);
    }

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("Manager".parse::<Role>().unwrap(), Role::Manager);
        assert_eq!(" owner ".parse::<Role>().unwrap(), Role::Owner);
        assert!("admin".parse::<Role>().is_err());
    }

    #[test]
    fn serializes_lowercase() {
        let json = serde_json::to_string(&Role::Librarian).unwrap();
        assert_eq!(json, "\"librarian\"");
    }
}

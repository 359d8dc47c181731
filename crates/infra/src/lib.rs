//! Infrastructure adapters: the access-control store and durable client-side storage.
//!
//! Both are collaborator seams. The traits are what the session layer depends
//! on; the in-memory implementations back tests/dev and the SQLite adapter is
//! the desktop store.

pub mod access;
pub mod persistence;

pub use access::{AccessControl, AccessQueryError, GrantRecord, InMemoryAccessControl};
pub use persistence::{InMemoryPersistence, PersistenceAdapter, PersistenceError, SqlitePersistence};

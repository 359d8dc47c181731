//! Durable client-side key/value storage.
//!
//! The session layer owns key naming and value encoding; adapters only move
//! strings. Reads and writes are async so a blocking backend never stalls the
//! caller's executor.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

mod in_memory;
mod sqlite;

pub use in_memory::InMemoryPersistence;
pub use sqlite::SqlitePersistence;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("persistence backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, PersistenceError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError>;

    /// Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<(), PersistenceError>;
}

#[async_trait]
impl<P> PersistenceAdapter for Arc<P>
where
    P: PersistenceAdapter + ?Sized,
{
    async fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        (**self).set(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<(), PersistenceError> {
        (**self).delete(key).await
    }
}

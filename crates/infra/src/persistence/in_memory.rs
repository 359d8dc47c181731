use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use super::{PersistenceAdapter, PersistenceError};

/// In-memory store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryPersistence {
    inner: RwLock<HashMap<String, String>>,
    failing: AtomicBool,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail while set.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Synchronous peek, for assertions.
    pub fn snapshot(&self, key: &str) -> Option<String> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> Result<(), PersistenceError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(PersistenceError::Backend("simulated storage failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PersistenceAdapter for InMemoryPersistence {
    async fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        self.check()?;
        Ok(self.snapshot(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        self.check()?;
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), PersistenceError> {
        self.check()?;
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}

//! SQLite-backed key/value store (desktop).

use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;

use super::{PersistenceAdapter, PersistenceError};

#[derive(Debug, Clone)]
enum Location {
    File(PathBuf),
    Memory,
}

/// SQLite key/value store, opened lazily on first use.
#[derive(Debug)]
pub struct SqlitePersistence {
    location: Location,
    pool: Mutex<Option<SqlitePool>>,
}

impl SqlitePersistence {
    pub fn open(path: impl AsRef<Path>) -> Self {
        Self {
            location: Location::File(path.as_ref().to_path_buf()),
            pool: Mutex::new(None),
        }
    }

    /// Private in-memory database (lost on drop).
    pub fn in_memory() -> Self {
        Self {
            location: Location::Memory,
            pool: Mutex::new(None),
        }
    }

    /// `{app_data_dir}/shelf/session.db`.
    pub fn default_path() -> anyhow::Result<PathBuf> {
        let mut dir = dirs::data_dir()
            .or_else(|| {
                dirs::home_dir().map(|mut h| {
                    h.push(".local");
                    h.push("share");
                    h
                })
            })
            .context("failed to resolve OS app data directory - tried data_dir() and home_dir()/.local/share")?;
        dir.push("shelf");
        dir.push("session.db");
        Ok(dir)
    }

    async fn pool(&self) -> anyhow::Result<SqlitePool> {
        let mut guard = self.pool.lock().await;
        if let Some(pool) = guard.as_ref() {
            return Ok(pool.clone());
        }

        let options = match &self.location {
            Location::File(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("failed to create session store directory at {:?}", parent)
                    })?;
                }
                SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true)
            }
            Location::Memory => SqliteConnectOptions::new().in_memory(true),
        };

        // One connection: an in-memory database is per-connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None::<std::time::Duration>)
            .max_lifetime(None::<std::time::Duration>)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open session store at {:?}", self.location))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key        TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .context("failed to create kv table")?;

        *guard = Some(pool.clone());
        Ok(pool)
    }
}

fn backend(err: anyhow::Error) -> PersistenceError {
    tracing::error!("session store error: {err:?}");
    PersistenceError::Backend(format!("{err:#}"))
}

#[async_trait]
impl PersistenceAdapter for SqlitePersistence {
    async fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        let result: anyhow::Result<Option<String>> = async {
            let pool = self.pool().await?;
            let row = sqlx::query("SELECT value FROM kv WHERE key = ?1")
                .bind(key)
                .fetch_optional(&pool)
                .await
                .context("failed to read session key")?;
            row.map(|r| r.try_get::<String, _>("value"))
                .transpose()
                .context("invalid value column")
        }
        .await;
        result.map_err(backend)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        let result: anyhow::Result<()> = async {
            let pool = self.pool().await?;
            sqlx::query(
                r#"
                INSERT INTO kv (key, value, updated_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(key)
            .bind(value)
            .bind(Utc::now().to_rfc3339())
            .execute(&pool)
            .await
            .context("failed to upsert session key")?;
            Ok(())
        }
        .await;
        result.map_err(backend)
    }

    async fn delete(&self, key: &str) -> Result<(), PersistenceError> {
        let result: anyhow::Result<()> = async {
            let pool = self.pool().await?;
            sqlx::query("DELETE FROM kv WHERE key = ?1")
                .bind(key)
                .execute(&pool)
                .await
                .context("failed to delete session key")?;
            Ok(())
        }
        .await;
        result.map_err(backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_and_delete() {
        let store = SqlitePersistence::in_memory();
        assert_eq!(store.get("selected_tenant:u1").await.unwrap(), None);

        store.set("selected_tenant:u1", r#"{"tenantId":"a"}"#).await.unwrap();
        store.set("selected_tenant:u1", r#"{"tenantId":"b"}"#).await.unwrap();
        assert_eq!(
            store.get("selected_tenant:u1").await.unwrap().as_deref(),
            Some(r#"{"tenantId":"b"}"#)
        );

        store.delete("selected_tenant:u1").await.unwrap();
        assert_eq!(store.get("selected_tenant:u1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let store = SqlitePersistence::in_memory();
        store.set("a", "1").await.unwrap();
        store.set("b", "2").await.unwrap();
        store.delete("a").await.unwrap();
        assert_eq!(store.get("b").await.unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn default_path_ends_in_session_db() {
        if let Ok(path) = SqlitePersistence::default_path() {
            assert!(path.ends_with("shelf/session.db"));
        }
    }
}

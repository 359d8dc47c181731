//! Runtime configuration (`SHELF_*` environment variables).

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use shelf_events::INVENTORY_TABLE;
use shelf_infra::SqlitePersistence;
use shelf_realtime::RetryPolicy;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            jitter: 0.1,
        }
    }
}

impl ReconnectConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            jitter: self.jitter.clamp(0.0, 1.0),
            ..RetryPolicy::exponential(
                self.max_attempts,
                Duration::from_millis(self.base_delay_ms),
                Duration::from_millis(self.max_delay_ms.max(self.base_delay_ms)),
            )
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShelfConfig {
    pub reconnect: ReconnectConfig,
    /// Column the change feed filters tenant rows on.
    pub tenant_filter_column: String,
    pub inventory_table: String,
    /// `None` means the OS data directory.
    pub selection_db_path: Option<PathBuf>,
}

impl Default for ShelfConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            tenant_filter_column: "tenant_id".to_string(),
            inventory_table: INVENTORY_TABLE.to_string(),
            selection_db_path: None,
        }
    }
}

impl ShelfConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset or unparseable values keep the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let reconnect = ReconnectConfig {
            max_attempts: parsed(&lookup, "SHELF_RECONNECT_MAX_ATTEMPTS", defaults.reconnect.max_attempts),
            base_delay_ms: parsed(&lookup, "SHELF_RECONNECT_BASE_DELAY_MS", defaults.reconnect.base_delay_ms),
            max_delay_ms: parsed(&lookup, "SHELF_RECONNECT_MAX_DELAY_MS", defaults.reconnect.max_delay_ms),
            jitter: parsed(&lookup, "SHELF_RECONNECT_JITTER", defaults.reconnect.jitter),
        };

        Self {
            reconnect,
            tenant_filter_column: non_empty(&lookup, "SHELF_TENANT_FILTER_COLUMN")
                .unwrap_or(defaults.tenant_filter_column),
            inventory_table: non_empty(&lookup, "SHELF_INVENTORY_TABLE")
                .unwrap_or(defaults.inventory_table),
            selection_db_path: non_empty(&lookup, "SHELF_SELECTION_DB").map(PathBuf::from),
        }
    }

    /// Configured path, or `{data_dir}/shelf/session.db`.
    pub fn selection_db_path(&self) -> anyhow::Result<PathBuf> {
        match &self.selection_db_path {
            Some(path) => Ok(path.clone()),
            None => SqlitePersistence::default_path(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.reconnect.retry_policy()
    }
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
{
    match non_empty(lookup, key) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, %default, "invalid config value; using default");
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = ShelfConfig::from_lookup(lookup(&[]));
        assert_eq!(config, ShelfConfig::default());
        assert_eq!(config.tenant_filter_column, "tenant_id");
        assert_eq!(config.inventory_table, "book_copies");
        assert_eq!(config.retry_policy().max_attempts, 5);
    }

    #[test]
    fn reads_overrides() {
        let config = ShelfConfig::from_lookup(lookup(&[
            ("SHELF_RECONNECT_MAX_ATTEMPTS", "8"),
            ("SHELF_RECONNECT_BASE_DELAY_MS", "250"),
            ("SHELF_RECONNECT_JITTER", "0"),
            ("SHELF_TENANT_FILTER_COLUMN", "library_id"),
            ("SHELF_SELECTION_DB", "/tmp/shelf.db"),
        ]));
        assert_eq!(config.reconnect.max_attempts, 8);
        assert_eq!(config.reconnect.base_delay_ms, 250);
        assert_eq!(config.tenant_filter_column, "library_id");
        assert_eq!(config.selection_db_path().unwrap(), PathBuf::from("/tmp/shelf.db"));

        let policy = config.retry_policy();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(250));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(500));
    }

    #[test]
    fn garbage_falls_back_to_default() {
        let config = ShelfConfig::from_lookup(lookup(&[
            ("SHELF_RECONNECT_MAX_ATTEMPTS", "many"),
            ("SHELF_RECONNECT_JITTER", "lots"),
            ("SHELF_INVENTORY_TABLE", "   "),
        ]));
        assert_eq!(config.reconnect, ReconnectConfig::default());
        assert_eq!(config.inventory_table, "book_copies");
    }

    #[test]
    fn deserializes_partial_json() {
        let config: ShelfConfig =
            serde_json::from_str(r#"{"reconnect": {"max_attempts": 2}}"#).unwrap();
        assert_eq!(config.reconnect.max_attempts, 2);
        assert_eq!(config.reconnect.base_delay_ms, 500);
        assert_eq!(config.tenant_filter_column, "tenant_id");
    }
}

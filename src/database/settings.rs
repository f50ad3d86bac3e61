//! Generic key/value persistence over the settings table
//!
//! Stores typed values as JSON text. The scheduler's lock, schedule fields
//! and statistics all live here, as do the run-scoped transient markers.
//! Lock acquisition and release are single SQL statements so concurrent
//! triggers never race a read-modify-write.

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::{Pool, Sqlite};

use crate::config::ConfigProvider;
use crate::errors::{ImportError, ImportResult};
use crate::models::ImportConfig;

/// Well-known settings keys
pub mod keys {
    pub const IMPORT_CONFIG: &str = "import_config";
    pub const SCHEDULED_JOB: &str = "scheduled_job";
    pub const SCHEDULER_STATS: &str = "scheduler_stats";
    pub const SCHEDULER_LOCK: &str = "scheduler_lock";
    /// Run-scoped transient markers all share this prefix so maintenance
    /// can purge orphans without knowing every key
    pub const RUN_PREFIX: &str = "run_";
    pub const RUN_SESSION: &str = "run_session_id";
    pub const RUN_HEADER: &str = "run_header";
}

#[derive(Clone)]
pub struct SettingsStore {
    pool: Pool<Sqlite>,
}

impl SettingsStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> ImportResult<Option<T>> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match value {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> ImportResult<()> {
        let text = serde_json::to_string(value)?;
        sqlx::query(
            "INSERT INTO settings (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT (key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(text)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn delete(&self, key: &str) -> ImportResult<()> {
        sqlx::query("DELETE FROM settings WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn keys_with_prefix(&self, prefix: &str) -> ImportResult<Vec<String>> {
        let rows = sqlx::query_scalar::<_, String>(
            "SELECT key FROM settings WHERE key LIKE ? ORDER BY key",
        )
        .bind(format!("{prefix}%"))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Try to take a TTL lock in one atomic statement.
    ///
    /// The insert succeeds when no lock row exists; the conflict update only
    /// fires when the held lock has already expired. Returns whether this
    /// caller now holds the lock. Lock timestamps are unix seconds so the
    /// expiry guard is a numeric comparison inside SQLite.
    pub async fn try_acquire_lock(
        &self,
        key: &str,
        holder: &str,
        ttl_secs: u64,
    ) -> ImportResult<bool> {
        let now = Utc::now().timestamp();
        let value = serde_json::json!({
            "holder": holder,
            "acquired_at": now,
            "expires_at": now + ttl_secs as i64,
        })
        .to_string();

        let result = sqlx::query(
            "INSERT INTO settings (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT (key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
             WHERE json_extract(settings.value, '$.expires_at') < ?",
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now())
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Release a lock this caller holds. A lock re-acquired by someone else
    /// after TTL expiry is left alone.
    pub async fn release_lock(&self, key: &str, holder: &str) -> ImportResult<()> {
        sqlx::query(
            "DELETE FROM settings WHERE key = ? AND json_extract(value, '$.holder') = ?",
        )
        .bind(key)
        .bind(holder)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Remove an expired lock row, returning whether one was removed
    pub async fn clear_expired_lock(&self, key: &str) -> ImportResult<bool> {
        let result = sqlx::query(
            "DELETE FROM settings WHERE key = ? AND json_extract(value, '$.expires_at') < ?",
        )
        .bind(key)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Loads the import configuration from the settings store
pub struct SettingsConfigProvider {
    settings: SettingsStore,
}

impl SettingsConfigProvider {
    pub fn new(settings: SettingsStore) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl ConfigProvider for SettingsConfigProvider {
    async fn import_config(&self) -> ImportResult<ImportConfig> {
        self.settings
            .get::<ImportConfig>(keys::IMPORT_CONFIG)
            .await?
            .ok_or_else(|| ImportError::config("no import configuration has been saved"))
    }
}

//! Mutual exclusion for scheduled triggers
//!
//! The lock is a single settings row claimed through a TTL-guarded UPSERT,
//! so concurrent triggers race inside SQLite rather than in process memory.
//! Expiry is a deadlock ceiling: a hung run loses its claim after the TTL
//! and the next trigger may proceed, which makes scheduled execution
//! at-least-once rather than at-most-once.

use uuid::Uuid;

use crate::database::settings::{keys, SettingsStore};
use crate::errors::ImportResult;

pub struct SchedulerLock {
    settings: SettingsStore,
    ttl_secs: u64,
}

impl SchedulerLock {
    pub fn new(settings: SettingsStore, ttl_secs: u64) -> Self {
        Self { settings, ttl_secs }
    }

    /// Try to claim the trigger lock. Returns the holder token to release
    /// with, or `None` when another holder has an unexpired claim.
    pub async fn try_acquire(&self) -> ImportResult<Option<String>> {
        let holder = Uuid::new_v4().to_string();
        let acquired = self
            .settings
            .try_acquire_lock(keys::SCHEDULER_LOCK, &holder, self.ttl_secs)
            .await?;

        Ok(acquired.then_some(holder))
    }

    /// Release a claim made by [`try_acquire`](Self::try_acquire). A claim
    /// that expired and was re-taken by someone else is left alone.
    pub async fn release(&self, holder: &str) -> ImportResult<()> {
        self.settings
            .release_lock(keys::SCHEDULER_LOCK, holder)
            .await
    }

    /// Drop an expired claim, returning whether one was dropped
    pub async fn clear_expired(&self) -> ImportResult<bool> {
        self.settings.clear_expired_lock(keys::SCHEDULER_LOCK).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn settings() -> SettingsStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query(
            "CREATE TABLE settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )",
        )
        .execute(&pool)
        .await
        .unwrap();
        SettingsStore::new(pool)
    }

    fn stale_claim() -> serde_json::Value {
        serde_json::json!({
            "holder": "stale",
            "acquired_at": Utc::now().timestamp() - 7200,
            "expires_at": Utc::now().timestamp() - 3600,
        })
    }

    #[tokio::test]
    async fn test_second_acquire_fails_until_release() {
        let lock = SchedulerLock::new(settings().await, 3600);

        let holder = lock.try_acquire().await.unwrap().unwrap();
        assert!(lock.try_acquire().await.unwrap().is_none());

        lock.release(&holder).await.unwrap();
        assert!(lock.try_acquire().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_expired_claim_can_be_retaken() {
        let settings = settings().await;
        settings
            .set(keys::SCHEDULER_LOCK, &stale_claim())
            .await
            .unwrap();

        let lock = SchedulerLock::new(settings, 3600);
        assert!(lock.try_acquire().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_clear_expired_only_touches_stale_claims() {
        let settings = settings().await;
        let lock = SchedulerLock::new(settings.clone(), 3600);

        assert!(!lock.clear_expired().await.unwrap());

        settings
            .set(keys::SCHEDULER_LOCK, &stale_claim())
            .await
            .unwrap();
        assert!(lock.clear_expired().await.unwrap());

        let _holder = lock.try_acquire().await.unwrap().unwrap();
        assert!(!lock.clear_expired().await.unwrap());
    }

    #[tokio::test]
    async fn test_release_by_non_holder_is_ignored() {
        let lock = SchedulerLock::new(settings().await, 3600);

        let _holder = lock.try_acquire().await.unwrap().unwrap();
        lock.release("someone-else").await.unwrap();
        assert!(lock.try_acquire().await.unwrap().is_none());
    }
}

//! Rolling statistics persistence

use chrono::{DateTime, Utc};

use crate::database::settings::{keys, SettingsStore};
use crate::errors::ImportResult;
use crate::models::SchedulerStats;

/// Loads, mutates and saves the persisted [`SchedulerStats`] value.
///
/// Statistics are only written while the scheduler lock is held, so the
/// load-modify-save sequence here never races itself.
pub struct StatsRecorder {
    settings: SettingsStore,
}

impl StatsRecorder {
    pub fn new(settings: SettingsStore) -> Self {
        Self { settings }
    }

    pub async fn load(&self) -> ImportResult<SchedulerStats> {
        Ok(self
            .settings
            .get::<SchedulerStats>(keys::SCHEDULER_STATS)
            .await?
            .unwrap_or_default())
    }

    async fn save(&self, stats: &SchedulerStats) -> ImportResult<()> {
        self.settings.set(keys::SCHEDULER_STATS, stats).await
    }

    pub async fn record_started(&self, at: DateTime<Utc>) -> ImportResult<()> {
        let mut stats = self.load().await?;
        stats.record_started(at);
        self.save(&stats).await
    }

    pub async fn record_completed(&self, at: DateTime<Utc>, processed: u64) -> ImportResult<()> {
        let mut stats = self.load().await?;
        stats.record_completed(at, processed);
        self.save(&stats).await
    }

    pub async fn record_failed(&self, at: DateTime<Utc>, message: &str) -> ImportResult<()> {
        let mut stats = self.load().await?;
        stats.record_failed(at, message);
        self.save(&stats).await
    }

    /// Drop day buckets older than the retention window
    pub async fn prune(&self, now: DateTime<Utc>) -> ImportResult<()> {
        let mut stats = self.load().await?;
        stats.prune(now);
        self.save(&stats).await
    }
}

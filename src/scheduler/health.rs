//! Scheduler self-checks
//!
//! Findings from the weekly check are kept on the checker instance and
//! surface through [`HealthChecker::status`]: a disabled scheduler or an
//! unfired trigger degrades health to warning, unresolved dependency
//! problems degrade it to error.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::models::{HealthLevel, HealthStatus, ScheduledJob};
use crate::scheduler::triggers::TriggerPlatform;
use crate::scheduler::IMPORT_HOOK;

/// Hook used for the disposable registration probe
pub const PROBE_HOOK: &str = "scheduler_probe";

pub struct HealthChecker {
    platform: Arc<dyn TriggerPlatform>,
    scheduler_enabled: bool,
    dependency_errors: Arc<RwLock<Vec<String>>>,
    last_check_at: Arc<RwLock<Option<DateTime<Utc>>>>,
}

impl HealthChecker {
    pub fn new(platform: Arc<dyn TriggerPlatform>, scheduler_enabled: bool) -> Self {
        Self {
            platform,
            scheduler_enabled,
            dependency_errors: Arc::new(RwLock::new(Vec::new())),
            last_check_at: Arc::new(RwLock::new(None)),
        }
    }

    /// Register, observe and clear a disposable one-shot to confirm the
    /// trigger mechanism still accepts registrations.
    pub async fn probe_trigger_mechanism(&self) -> bool {
        let when = Utc::now() + Duration::minutes(5);
        if let Err(e) = self.platform.register_one_shot(when, PROBE_HOOK).await {
            self.record_dependency_error(format!("trigger probe registration failed: {e}"))
                .await;
            return false;
        }

        let visible = self.platform.next_run_time(PROBE_HOOK).await.is_some();
        self.platform.clear_recurring(PROBE_HOOK).await;

        if !visible {
            self.record_dependency_error(
                "trigger probe registered but never became visible".to_string(),
            )
            .await;
            return false;
        }

        debug!("Trigger mechanism probe succeeded");
        true
    }

    pub async fn record_dependency_error(&self, message: String) {
        warn!("Scheduler dependency problem: {}", message);
        self.dependency_errors.write().await.push(message);
    }

    /// Forget previous findings at the start of a fresh check
    pub async fn clear_dependency_errors(&self) {
        self.dependency_errors.write().await.clear();
    }

    pub async fn mark_checked(&self, at: DateTime<Utc>) {
        *self.last_check_at.write().await = Some(at);
    }

    pub async fn last_check_at(&self) -> Option<DateTime<Utc>> {
        *self.last_check_at.read().await
    }

    /// Current health snapshot. Warning when the scheduler feature is off or
    /// the next run is more than an hour overdue; error when dependency
    /// problems from the last check remain unresolved.
    ///
    /// Overdue-ness prefers the live platform registration and falls back to
    /// the persisted `next_run_at`, so a stale schedule is visible even from
    /// a process that is not running the daemon.
    pub async fn status(&self, job: Option<&ScheduledJob>) -> HealthStatus {
        let mut issues = Vec::new();
        let mut overall = HealthLevel::Good;

        if !self.scheduler_enabled {
            issues.push(
                "the scheduler feature is disabled in the application configuration".to_string(),
            );
            overall = HealthLevel::Warning;
        }

        if let Some(job) = job {
            let next = match self.platform.next_run_time(IMPORT_HOOK).await {
                Some(next) => next,
                None => job.next_run_at,
            };
            if next < Utc::now() - Duration::hours(1) {
                issues.push(format!(
                    "the next run was due at {} and has not fired",
                    next.format("%Y-%m-%d %H:%M:%S UTC")
                ));
                overall = HealthLevel::Warning;
            }
        }

        let dependency_errors = self.dependency_errors.read().await;
        if !dependency_errors.is_empty() {
            issues.extend(dependency_errors.iter().cloned());
            overall = HealthLevel::Error;
        }

        HealthStatus { overall, issues }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Frequency, ScheduleOptions, SourceKind};
    use crate::scheduler::TokioTriggerPlatform;

    fn job(frequency: Frequency) -> ScheduledJob {
        ScheduledJob {
            frequency,
            source: SourceKind::Local,
            options: ScheduleOptions::default(),
            next_run_at: Utc::now(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_status_good_when_nothing_is_scheduled() {
        let platform = Arc::new(TokioTriggerPlatform::new());
        let checker = HealthChecker::new(platform, true);

        let status = checker.status(None).await;
        assert_eq!(status.overall, HealthLevel::Good);
        assert!(status.issues.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_scheduler_degrades_to_warning() {
        let platform = Arc::new(TokioTriggerPlatform::new());
        let checker = HealthChecker::new(platform, false);

        let status = checker.status(None).await;
        assert_eq!(status.overall, HealthLevel::Warning);
        assert_eq!(status.issues.len(), 1);
    }

    #[tokio::test]
    async fn test_stale_persisted_next_run_is_a_warning() {
        let platform = Arc::new(TokioTriggerPlatform::new());
        let checker = HealthChecker::new(platform, true);

        let mut stale = job(Frequency::Daily);
        stale.next_run_at = Utc::now() - Duration::hours(3);
        let status = checker.status(Some(&stale)).await;
        assert_eq!(status.overall, HealthLevel::Warning);
        assert!(status.issues[0].contains("has not fired"));

        let fresh = job(Frequency::Daily);
        let status = checker.status(Some(&fresh)).await;
        assert_eq!(status.overall, HealthLevel::Good);
    }

    #[tokio::test]
    async fn test_overdue_trigger_is_a_warning() {
        let platform = Arc::new(TokioTriggerPlatform::new());
        platform
            .register_recurring(
                Utc::now() - Duration::hours(2),
                "daily",
                IMPORT_HOOK,
                serde_json::Value::Null,
            )
            .await
            .unwrap();
        let checker = HealthChecker::new(platform, true);

        let status = checker.status(Some(&job(Frequency::Daily))).await;
        assert_eq!(status.overall, HealthLevel::Warning);
        assert!(status.issues[0].contains("has not fired"));
    }

    #[tokio::test]
    async fn test_dependency_errors_degrade_to_error() {
        let platform = Arc::new(TokioTriggerPlatform::new());
        let checker = HealthChecker::new(platform, true);

        checker
            .record_dependency_error("settings table missing".to_string())
            .await;
        let status = checker.status(None).await;
        assert_eq!(status.overall, HealthLevel::Error);

        checker.clear_dependency_errors().await;
        let status = checker.status(None).await;
        assert_eq!(status.overall, HealthLevel::Good);
    }

    #[tokio::test]
    async fn test_probe_leaves_no_residue() {
        let platform = Arc::new(TokioTriggerPlatform::new());
        let checker = HealthChecker::new(platform.clone(), true);

        assert!(checker.probe_trigger_mechanism().await);
        assert_eq!(platform.next_run_time(PROBE_HOOK).await, None);
        assert!(checker.dependency_errors.read().await.is_empty());
    }
}

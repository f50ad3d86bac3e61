//! Recurring-import scheduling
//!
//! The scheduler owns the persisted [`ScheduledJob`], the trigger-platform
//! registrations that fire it, the mutual-exclusion lock around scheduled
//! runs, rolling statistics and the periodic self-checks. It is an explicit
//! service object; every piece of state lives on the instance or in the
//! settings store, never in process-wide statics.

use anyhow::Result;
use chrono::{DateTime, Duration, Timelike, Utc};
use cron::Schedule;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use sysinfo::{Disks, System};
use tokio::time::interval;
use tracing::{debug, error, info, warn};

pub mod health;
pub mod lock;
pub mod stats;
pub mod triggers;

pub use health::HealthChecker;
pub use lock::SchedulerLock;
pub use stats::StatsRecorder;
pub use triggers::{FiredTrigger, TokioTriggerPlatform, TriggerPlatform};

use crate::config::{ConfigProvider, SchedulerConfig};
use crate::database::settings::{keys, SettingsStore};
use crate::errors::{SchedulerError, SchedulerResult, Severity};
use crate::importer::{ConfigValidator, ImportRun, ImportStateManager};
use crate::models::{
    Frequency, RunReport, RunTrigger, ScheduleOptions, ScheduledJob, SchedulerInfo, SourceKind,
};
use crate::sources::CsvSource;

/// Hook fired for each scheduled import run
pub const IMPORT_HOOK: &str = "scheduled_import";

/// Hook for the daily settings cleanup
pub const MAINTENANCE_HOOK: &str = "scheduler_maintenance";

/// Hook for the weekly self-check
pub const HEALTH_CHECK_HOOK: &str = "scheduler_health_check";

pub struct SchedulerService {
    config: SchedulerConfig,
    settings: SettingsStore,
    platform: Arc<dyn TriggerPlatform>,
    provider: Arc<dyn ConfigProvider>,
    validator: ConfigValidator,
    runner: Arc<ImportRun>,
    state: ImportStateManager,
    lock: SchedulerLock,
    stats: StatsRecorder,
    health: HealthChecker,
}

impl SchedulerService {
    pub fn new(
        config: SchedulerConfig,
        settings: SettingsStore,
        platform: Arc<dyn TriggerPlatform>,
        provider: Arc<dyn ConfigProvider>,
        source: Arc<CsvSource>,
        runner: Arc<ImportRun>,
        state: ImportStateManager,
    ) -> Self {
        let lock = SchedulerLock::new(settings.clone(), config.lock_ttl_secs);
        let stats = StatsRecorder::new(settings.clone());
        let validator = ConfigValidator::new(source);
        let health = HealthChecker::new(platform.clone(), config.enabled);

        Self {
            config,
            settings,
            platform,
            provider,
            validator,
            runner,
            state,
            lock,
            stats,
            health,
        }
    }

    /// Create or replace the recurring import job.
    ///
    /// Validates the frequency against the closed set (named cadences plus
    /// cron expressions), the source against remote/local, and re-validates
    /// the import configuration including the requested source's readiness.
    /// The job is persisted only after the platform accepts the
    /// registration.
    pub async fn schedule(
        &self,
        frequency: &str,
        source: &str,
        options: ScheduleOptions,
    ) -> SchedulerResult<ScheduledJob> {
        if !self.config.enabled {
            return Err(SchedulerError::Disabled);
        }

        let frequency = Frequency::from(frequency.to_string());
        if let Frequency::Custom(expr) = &frequency {
            Schedule::from_str(expr).map_err(|_| SchedulerError::InvalidFrequency(expr.clone()))?;
        }
        let source = source
            .parse::<SourceKind>()
            .map_err(SchedulerError::InvalidSource)?;

        let import_config = self.provider.import_config().await?;
        let report = self.validator.validate(&import_config).await;
        if !report.valid {
            return Err(SchedulerError::config_invalid(report.errors.join("; ")));
        }
        let source_ready = match source {
            SourceKind::Remote => report.remote_ready,
            SourceKind::Local => report.local_ready,
        };
        if !source_ready {
            return Err(SchedulerError::config_invalid(format!(
                "the {source} source is not ready"
            )));
        }

        let now = Utc::now();
        let first_run = if options.start_immediately {
            now + Duration::minutes(1)
        } else {
            top_of_next_hour(now)
        };

        let job = ScheduledJob {
            frequency,
            source,
            options,
            next_run_at: first_run,
            created_at: now,
        };

        self.platform.clear_recurring(IMPORT_HOOK).await;
        self.register_job_trigger(&job, first_run).await?;
        if let Err(e) = self.settings.set(keys::SCHEDULED_JOB, &job).await {
            // Leave no registration behind when the job itself cannot be saved
            self.platform.clear_recurring(IMPORT_HOOK).await;
            return Err(e.into());
        }

        info!(
            "Scheduled recurring {} import from the {} source, first run at {}",
            job.frequency,
            job.source,
            first_run.format("%Y-%m-%d %H:%M:%S UTC")
        );
        Ok(job)
    }

    /// Clear the recurring trigger and all persisted schedule fields.
    /// Idempotent; unscheduling when nothing is scheduled is a no-op.
    pub async fn unschedule(&self) -> SchedulerResult<()> {
        self.platform.clear_recurring(IMPORT_HOOK).await;
        self.settings.delete(keys::SCHEDULED_JOB).await?;
        info!("Recurring import unscheduled");
        Ok(())
    }

    /// Handle one firing of the recurring trigger.
    ///
    /// Takes the TTL lock first; a trigger arriving while another holds the
    /// lock (or while a manual run is active) is skipped, not queued. The
    /// lock is released on every path. A critical failure auto-disables the
    /// schedule; anything else leaves it intact for the next natural
    /// trigger.
    pub async fn on_trigger(
        &self,
        source: SourceKind,
        options: &ScheduleOptions,
    ) -> SchedulerResult<RunReport> {
        if !self.config.enabled {
            return Err(SchedulerError::Disabled);
        }

        let Some(holder) = self.lock.try_acquire().await? else {
            info!("Trigger skipped: another scheduled run holds the lock");
            return Err(SchedulerError::AlreadyRunning);
        };

        let outcome = self.locked_trigger(source, options).await;

        if let Err(e) = self.lock.release(&holder).await {
            warn!("Failed to release the scheduler lock: {}", e);
        }

        let critical = match &outcome {
            Ok(report) => report.failure == Some(Severity::Critical),
            Err(e) => e.is_critical(),
        };
        if critical {
            error!(
                critical = true,
                "Scheduled run failed critically; disabling the schedule"
            );
            if let Err(e) = self.unschedule().await {
                error!("Failed to auto-disable the schedule: {}", e);
            }
        } else {
            self.refresh_next_run().await;
        }

        outcome
    }

    async fn locked_trigger(
        &self,
        source: SourceKind,
        options: &ScheduleOptions,
    ) -> SchedulerResult<RunReport> {
        if self.state.is_running().await {
            info!("Trigger skipped: an import is already running");
            return Err(SchedulerError::AlreadyRunning);
        }

        let import_config = self.provider.import_config().await?;
        if import_config.source.kind != source {
            warn!(
                "Scheduled source {} no longer matches the configured {} source",
                source, import_config.source.kind
            );
        }
        // Only a structurally broken configuration is hopeless enough to
        // reject here; an unreachable source falls through to the run, which
        // fails fatal and leaves the schedule for the next natural trigger.
        let report = self.validator.validate(&import_config).await;
        if !report.complete {
            return Err(SchedulerError::config_invalid(report.errors.join("; ")));
        }
        if !report.valid {
            warn!(
                "Source readiness probe failed, running the import anyway: {}",
                report.errors.join("; ")
            );
        }

        if !options.skip_resource_checks {
            self.check_resource_headroom()?;
        }

        if let Err(e) = self.stats.record_started(Utc::now()).await {
            warn!("Failed to record the run start in statistics: {}", e);
        }

        let run_report = self.runner.execute(RunTrigger::Scheduled).await;

        let finished = Utc::now();
        let recorded = if run_report.success {
            self.stats
                .record_completed(finished, run_report.processed as u64)
                .await
        } else {
            self.stats.record_failed(finished, &run_report.message).await
        };
        if let Err(e) = recorded {
            warn!("Failed to record the run outcome in statistics: {}", e);
        }

        Ok(run_report)
    }

    /// Pre-flight memory and disk headroom check for scheduled runs
    fn check_resource_headroom(&self) -> SchedulerResult<()> {
        let mut system = System::new();
        system.refresh_memory();
        let total = system.total_memory();
        if total > 0 {
            let used_percent = system.used_memory() as f64 / total as f64 * 100.0;
            if used_percent > self.config.max_memory_usage_percent {
                return Err(SchedulerError::resource_headroom(format!(
                    "memory usage {used_percent:.1}% is above the {:.1}% ceiling",
                    self.config.max_memory_usage_percent
                )));
            }
        }

        let disks = Disks::new_with_refreshed_list();
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        let available = disks
            .list()
            .iter()
            .filter(|disk| cwd.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| disk.available_space());
        if let Some(available) = available {
            let available_mb = available / (1024 * 1024);
            if available_mb < self.config.min_free_disk_mb {
                return Err(SchedulerError::resource_headroom(format!(
                    "{available_mb} MB of free disk is below the {} MB floor",
                    self.config.min_free_disk_mb
                )));
            }
        }

        Ok(())
    }

    /// Daily cleanup: prune the statistics window, purge run-scoped settings
    /// left behind by an interrupted run, and drop an expired lock claim.
    pub async fn run_maintenance(&self) -> SchedulerResult<()> {
        debug!("Running daily scheduler maintenance");

        self.stats.prune(Utc::now()).await?;

        if !self.state.is_running().await {
            for key in self.settings.keys_with_prefix(keys::RUN_PREFIX).await? {
                debug!("Purging orphaned run marker '{}'", key);
                self.settings.delete(&key).await?;
            }
        }

        if self.lock.clear_expired().await? {
            info!("Cleared an expired scheduler lock");
        }

        Ok(())
    }

    /// Weekly self-check: clear an overdue trigger, repair drift between the
    /// persisted job and the live registration, and probe the trigger
    /// mechanism with a disposable one-shot.
    pub async fn run_health_check(&self) -> SchedulerResult<()> {
        let now = Utc::now();
        debug!("Running scheduler health check");
        self.health.clear_dependency_errors().await;

        let job: Option<ScheduledJob> = self.settings.get(keys::SCHEDULED_JOB).await?;

        if let Some(next) = self.platform.next_run_time(IMPORT_HOOK).await {
            if next < now - Duration::hours(1) {
                warn!(
                    "Scheduled import trigger is overdue (was due {}); clearing it",
                    next.format("%Y-%m-%d %H:%M:%S UTC")
                );
                self.platform.clear_recurring(IMPORT_HOOK).await;
            }
        }

        match &job {
            Some(job) => {
                if self.platform.next_run_time(IMPORT_HOOK).await.is_none() {
                    let first_run = next_natural_run(&job.frequency, now);
                    warn!(
                        "A {} job is persisted but no trigger is registered; re-registering for {}",
                        job.frequency,
                        first_run.format("%Y-%m-%d %H:%M:%S UTC")
                    );
                    if let Err(e) = self.register_job_trigger(job, first_run).await {
                        self.health
                            .record_dependency_error(format!(
                                "re-registering the import trigger failed: {e}"
                            ))
                            .await;
                    }
                }
            }
            None => {
                if self.platform.next_run_time(IMPORT_HOOK).await.is_some() {
                    warn!("An import trigger is registered with no persisted job; clearing it");
                    self.platform.clear_recurring(IMPORT_HOOK).await;
                }
            }
        }

        self.health.probe_trigger_mechanism().await;
        self.health.mark_checked(now).await;
        Ok(())
    }

    /// Read-only snapshot of the schedule, statistics and health
    pub async fn get_info(&self) -> SchedulerResult<SchedulerInfo> {
        let job: Option<ScheduledJob> = self.settings.get(keys::SCHEDULED_JOB).await?;
        let next_run = match &job {
            Some(job) => Some(
                self.platform
                    .next_run_time(IMPORT_HOOK)
                    .await
                    .unwrap_or(job.next_run_at),
            ),
            None => None,
        };
        let stats = self.stats.load().await?;
        let health = self.health.status(job.as_ref()).await;

        Ok(SchedulerInfo {
            is_scheduled: job.is_some(),
            next_run,
            frequency: job.as_ref().map(|j| j.frequency.clone()),
            source: job.as_ref().map(|j| j.source),
            stats,
            health,
        })
    }

    /// Run the scheduler daemon: restore the persisted registration, install
    /// the housekeeping triggers and poll the platform once a second.
    pub async fn start(&self) -> Result<()> {
        info!("Starting scheduler daemon");
        if !self.config.enabled {
            warn!("Scheduler is disabled; triggers will be skipped until it is re-enabled");
        }

        self.register_custom_intervals().await;
        self.restore_registration().await;
        self.register_housekeeping().await?;

        if let Some(next) = self.platform.next_run_time(IMPORT_HOOK).await {
            info!(
                "Next scheduled import: {}",
                next.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }

        let mut tick = interval(std::time::Duration::from_secs(1));
        loop {
            tick.tick().await;
            let now = Utc::now();
            for trigger in self.platform.due_hooks(now).await {
                self.dispatch(trigger).await;
            }
        }
    }

    async fn dispatch(&self, trigger: FiredTrigger) {
        match trigger.hook.as_str() {
            IMPORT_HOOK => self.dispatch_import().await,
            MAINTENANCE_HOOK => {
                if let Err(e) = self.run_maintenance().await {
                    error!("Scheduler maintenance failed: {}", e);
                }
            }
            HEALTH_CHECK_HOOK => {
                if let Err(e) = self.run_health_check().await {
                    error!("Scheduler health check failed: {}", e);
                }
            }
            other => debug!("Ignoring unknown trigger hook '{}'", other),
        }
    }

    async fn dispatch_import(&self) {
        let job = match self.settings.get::<ScheduledJob>(keys::SCHEDULED_JOB).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!("Import trigger fired with no persisted job; clearing the registration");
                self.platform.clear_recurring(IMPORT_HOOK).await;
                return;
            }
            Err(e) => {
                error!("Failed to load the persisted job: {}", e);
                return;
            }
        };

        match self.on_trigger(job.source, &job.options).await {
            Ok(report) => info!(
                success = report.success,
                processed = report.processed,
                created = report.created,
                skipped = report.skipped,
                errors = report.errors,
                "Scheduled import finished"
            ),
            Err(SchedulerError::AlreadyRunning) => {
                debug!("Scheduled import skipped: an import is already running");
            }
            Err(e) => error!("Scheduled import failed: {}", e),
        }
    }

    /// Re-register the persisted job at daemon startup. In-memory trigger
    /// registrations do not survive a restart; the persisted job does.
    async fn restore_registration(&self) {
        match self.settings.get::<ScheduledJob>(keys::SCHEDULED_JOB).await {
            Ok(Some(job)) => {
                if self.platform.next_run_time(IMPORT_HOOK).await.is_some() {
                    return;
                }
                let now = Utc::now();
                let first_run = if job.next_run_at > now {
                    job.next_run_at
                } else {
                    next_natural_run(&job.frequency, now)
                };
                match self.register_job_trigger(&job, first_run).await {
                    Ok(()) => info!(
                        "Restored {} import schedule, next run at {}",
                        job.frequency,
                        first_run.format("%Y-%m-%d %H:%M:%S UTC")
                    ),
                    Err(e) => error!("Failed to restore the import schedule: {}", e),
                }
            }
            Ok(None) => {}
            Err(e) => error!("Failed to load the persisted job: {}", e),
        }
    }

    async fn register_housekeeping(&self) -> SchedulerResult<()> {
        let first_run = top_of_next_hour(Utc::now());
        if self.platform.next_run_time(MAINTENANCE_HOOK).await.is_none() {
            self.platform
                .register_recurring(first_run, "daily", MAINTENANCE_HOOK, serde_json::Value::Null)
                .await?;
        }
        if self.platform.next_run_time(HEALTH_CHECK_HOOK).await.is_none() {
            self.platform
                .register_recurring(
                    first_run,
                    "weekly",
                    HEALTH_CHECK_HOOK,
                    serde_json::Value::Null,
                )
                .await?;
        }
        Ok(())
    }

    async fn register_job_trigger(
        &self,
        job: &ScheduledJob,
        first_run: DateTime<Utc>,
    ) -> SchedulerResult<()> {
        self.register_custom_intervals().await;
        let args = serde_json::json!({ "source": job.source });
        self.platform
            .register_recurring(first_run, job.frequency.as_key(), IMPORT_HOOK, args)
            .await
    }

    /// The two short cadences are additions on top of the platform's
    /// standard interval table.
    async fn register_custom_intervals(&self) {
        self.platform
            .add_interval(Frequency::Every15Min.as_key(), Duration::minutes(15))
            .await;
        self.platform
            .add_interval(Frequency::Every30Min.as_key(), Duration::minutes(30))
            .await;
    }

    /// Keep the persisted next-run timestamp in step with the live
    /// registration so status reads from other processes stay accurate.
    async fn refresh_next_run(&self) {
        let Some(next) = self.platform.next_run_time(IMPORT_HOOK).await else {
            return;
        };
        match self.settings.get::<ScheduledJob>(keys::SCHEDULED_JOB).await {
            Ok(Some(mut job)) => {
                job.next_run_at = next;
                if let Err(e) = self.settings.set(keys::SCHEDULED_JOB, &job).await {
                    debug!("Failed to refresh the persisted next-run time: {}", e);
                }
            }
            Ok(None) => {}
            Err(e) => debug!("Failed to load the persisted job: {}", e),
        }
    }
}

/// The top of the hour after `now`
pub fn top_of_next_hour(now: DateTime<Utc>) -> DateTime<Utc> {
    let truncated = now
        .with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now);
    truncated + Duration::hours(1)
}

/// Where a cadence next fires naturally, used when re-registering a trigger
/// whose original registration was lost
fn next_natural_run(frequency: &Frequency, now: DateTime<Utc>) -> DateTime<Utc> {
    match frequency {
        Frequency::Custom(expr) => Schedule::from_str(expr)
            .ok()
            .and_then(|schedule| schedule.after(&now).next())
            .unwrap_or_else(|| top_of_next_hour(now)),
        _ => top_of_next_hour(now),
    }
}

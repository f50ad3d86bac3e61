//! Recurring-trigger platform abstraction
//!
//! The scheduler never talks to a timer directly; it registers named hooks
//! against a [`TriggerPlatform`] and reacts when they come due. The
//! in-process [`TokioTriggerPlatform`] keeps registrations in memory and is
//! polled by the daemon's tick loop. Registrations do not survive a restart;
//! the daemon re-registers from the persisted job at startup.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::errors::{SchedulerError, SchedulerResult};

/// A hook that has come due, together with the args it was registered with
#[derive(Debug, Clone)]
pub struct FiredTrigger {
    pub hook: String,
    pub args: Value,
}

/// Registration surface of the recurring-trigger platform.
///
/// Frequency keys name entries in the platform's interval table; a key not
/// in the table is treated as a cron expression.
#[async_trait]
pub trait TriggerPlatform: Send + Sync {
    /// Add a named interval to the platform's interval table. Re-adding an
    /// existing key replaces its period.
    async fn add_interval(&self, key: &str, period: Duration);

    /// Register a recurring trigger for `hook`, first firing at `first_run`
    /// and repeating at the cadence named by `frequency_key`. Replaces any
    /// existing recurring registration for the same hook.
    async fn register_recurring(
        &self,
        first_run: DateTime<Utc>,
        frequency_key: &str,
        hook: &str,
        args: Value,
    ) -> SchedulerResult<()>;

    /// Register a trigger that fires exactly once at `when`
    async fn register_one_shot(&self, when: DateTime<Utc>, hook: &str) -> SchedulerResult<()>;

    /// The next time `hook` is due, when it has any registration
    async fn next_run_time(&self, hook: &str) -> Option<DateTime<Utc>>;

    /// Remove every registration for `hook`, recurring and one-shot alike.
    /// Idempotent.
    async fn clear_recurring(&self, hook: &str);

    /// Collect the hooks due at `now`, advancing each recurring trigger past
    /// `now`. A trigger that missed several occurrences fires once.
    async fn due_hooks(&self, now: DateTime<Utc>) -> Vec<FiredTrigger>;
}

#[derive(Clone)]
enum Cadence {
    Interval(Duration),
    Cron(Schedule),
}

#[derive(Clone)]
struct RecurringTrigger {
    cadence: Cadence,
    next_run: DateTime<Utc>,
    args: Value,
}

struct OneShot {
    when: DateTime<Utc>,
    hook: String,
}

struct PlatformState {
    intervals: HashMap<String, Duration>,
    recurring: HashMap<String, RecurringTrigger>,
    one_shots: Vec<OneShot>,
}

/// In-memory trigger platform driven by the scheduler daemon's tick loop
pub struct TokioTriggerPlatform {
    state: Arc<RwLock<PlatformState>>,
}

impl TokioTriggerPlatform {
    pub fn new() -> Self {
        let mut intervals = HashMap::new();
        intervals.insert("hourly".to_string(), Duration::hours(1));
        intervals.insert("twicedaily".to_string(), Duration::hours(12));
        intervals.insert("daily".to_string(), Duration::days(1));
        intervals.insert("weekly".to_string(), Duration::days(7));
        intervals.insert("monthly".to_string(), Duration::days(30));

        Self {
            state: Arc::new(RwLock::new(PlatformState {
                intervals,
                recurring: HashMap::new(),
                one_shots: Vec::new(),
            })),
        }
    }
}

impl Default for TokioTriggerPlatform {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TriggerPlatform for TokioTriggerPlatform {
    async fn add_interval(&self, key: &str, period: Duration) {
        if period <= Duration::zero() {
            warn!("Ignoring interval '{}' with a non-positive period", key);
            return;
        }
        self.state
            .write()
            .await
            .intervals
            .insert(key.to_string(), period);
    }

    async fn register_recurring(
        &self,
        first_run: DateTime<Utc>,
        frequency_key: &str,
        hook: &str,
        args: Value,
    ) -> SchedulerResult<()> {
        let mut state = self.state.write().await;

        let cadence = match state.intervals.get(frequency_key) {
            Some(period) => Cadence::Interval(*period),
            None => match Schedule::from_str(frequency_key) {
                Ok(schedule) => Cadence::Cron(schedule),
                Err(e) => {
                    return Err(SchedulerError::trigger_registration(format!(
                        "'{frequency_key}' is neither a known interval nor a cron expression: {e}"
                    )));
                }
            },
        };

        debug!(
            "Registering recurring trigger '{}' ({}) first firing at {}",
            hook,
            frequency_key,
            first_run.format("%Y-%m-%d %H:%M:%S UTC")
        );
        state.recurring.insert(
            hook.to_string(),
            RecurringTrigger {
                cadence,
                next_run: first_run,
                args,
            },
        );
        Ok(())
    }

    async fn register_one_shot(&self, when: DateTime<Utc>, hook: &str) -> SchedulerResult<()> {
        let mut state = self.state.write().await;
        state.one_shots.push(OneShot {
            when,
            hook: hook.to_string(),
        });
        Ok(())
    }

    async fn next_run_time(&self, hook: &str) -> Option<DateTime<Utc>> {
        let state = self.state.read().await;
        let recurring = state.recurring.get(hook).map(|t| t.next_run);
        let one_shot = state
            .one_shots
            .iter()
            .filter(|o| o.hook == hook)
            .map(|o| o.when)
            .min();

        match (recurring, one_shot) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    async fn clear_recurring(&self, hook: &str) {
        let mut state = self.state.write().await;
        state.recurring.remove(hook);
        state.one_shots.retain(|o| o.hook != hook);
    }

    async fn due_hooks(&self, now: DateTime<Utc>) -> Vec<FiredTrigger> {
        let mut state = self.state.write().await;
        let mut fired = Vec::new();
        let mut exhausted = Vec::new();

        for (hook, trigger) in state.recurring.iter_mut() {
            if trigger.next_run > now {
                continue;
            }

            fired.push(FiredTrigger {
                hook: hook.clone(),
                args: trigger.args.clone(),
            });

            match &trigger.cadence {
                Cadence::Interval(period) => {
                    // Missed occurrences collapse into the single firing above
                    let mut next = trigger.next_run + *period;
                    while next <= now {
                        next += *period;
                    }
                    trigger.next_run = next;
                }
                Cadence::Cron(schedule) => match schedule.after(&now).next() {
                    Some(next) => trigger.next_run = next,
                    None => exhausted.push(hook.clone()),
                },
            }
        }

        for hook in exhausted {
            warn!("Cron trigger '{}' has no future occurrence; clearing it", hook);
            state.recurring.remove(&hook);
        }

        let mut due_one_shots = Vec::new();
        state.one_shots.retain(|o| {
            if o.when <= now {
                due_one_shots.push(o.hook.clone());
                false
            } else {
                true
            }
        });
        for hook in due_one_shots {
            fired.push(FiredTrigger {
                hook,
                args: Value::Null,
            });
        }

        fired
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::errors::Severity;

/// Captured per-session error messages are bounded to the first N
pub const MAX_CAPTURED_ERRORS: usize = 10;

/// Recent-error entries kept in scheduler statistics
pub const MAX_RECENT_ERRORS: usize = 20;

/// Recent-error message text is truncated to this many characters
pub const MAX_ERROR_TEXT: usize = 200;

/// Statistics are kept for a rolling window of this many days
pub const STATS_RETENTION_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Remote,
    Local,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Remote => "remote",
            Self::Local => "local",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "remote" => Ok(Self::Remote),
            "local" => Ok(Self::Local),
            other => Err(format!("unknown source kind: {other}")),
        }
    }
}

/// Where and how to acquire the CSV data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub kind: SourceKind,
    pub url: Option<String>,
    pub path: Option<PathBuf>,
    /// "auto", a single character, or "tab"
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

fn default_delimiter() -> String {
    "auto".to_string()
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Remote,
            url: None,
            path: None,
            delimiter: default_delimiter(),
            username: None,
            password: None,
        }
    }
}

impl SourceConfig {
    /// Human-readable source location for logs and validation messages
    pub fn location(&self) -> String {
        match self.kind {
            SourceKind::Remote => self.url.clone().unwrap_or_else(|| "<no url>".to_string()),
            SourceKind::Local => self
                .path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "<no path>".to_string()),
        }
    }
}

/// Which downstream rendering engine owns a record's body format
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BuilderKind {
    #[default]
    None,
    Plain,
    Elementor,
    BeaverBuilder,
    Divi,
}

impl BuilderKind {
    /// True when the template body is a serialized structure that must be
    /// decoded, transformed leaf-by-leaf and re-encoded
    pub fn is_structured(&self) -> bool {
        matches!(self, Self::Elementor)
    }

    /// Metadata flags the rendering engine requires on every record it owns.
    /// Written unconditionally after substitution, never derived from
    /// template content.
    pub fn meta_contract(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::None | Self::Plain => &[],
            Self::Elementor => &[
                ("_elementor_edit_mode", "builder"),
                ("_elementor_template_type", "wp-page"),
            ],
            Self::BeaverBuilder => &[("_fl_builder_enabled", "1")],
            Self::Divi => &[
                ("_et_pb_use_builder", "on"),
                ("_et_pb_page_layout", "et_no_sidebar"),
            ],
        }
    }
}

/// Advisory per-run resource ceilings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResourceLimits {
    pub memory_limit_mb: Option<u64>,
    pub time_limit_secs: Option<u64>,
}

/// Everything one import run needs to know. Loaded once at run start and
/// treated as immutable for the duration of the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default = "default_status")]
    pub status: String,
    pub template_id: Option<i64>,
    #[serde(default)]
    pub builder: BuilderKind,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub required_columns: Vec<String>,
    #[serde(default)]
    pub skip_duplicates: bool,
    #[serde(default)]
    pub column_mapping: HashMap<String, String>,
    #[serde(default)]
    pub attach_images: bool,
    /// Prefix applied to non-reserved columns written as custom fields
    #[serde(default = "default_meta_prefix")]
    pub meta_prefix: String,
    /// Cooperative pause inserted into the row loop; 0 disables throttling
    #[serde(default = "default_throttle_pause_ms")]
    pub throttle_pause_ms: u64,
    #[serde(default)]
    pub limits: ResourceLimits,
}

fn default_content_type() -> String {
    "post".to_string()
}

fn default_status() -> String {
    "draft".to_string()
}

fn default_meta_prefix() -> String {
    "csv_".to_string()
}

fn default_throttle_pause_ms() -> u64 {
    100
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            content_type: default_content_type(),
            status: default_status(),
            template_id: None,
            builder: BuilderKind::None,
            source: SourceConfig::default(),
            required_columns: Vec::new(),
            skip_duplicates: false,
            column_mapping: HashMap::new(),
            attach_images: false,
            meta_prefix: default_meta_prefix(),
            throttle_pause_ms: default_throttle_pause_ms(),
            limits: ResourceLimits::default(),
        }
    }
}

/// Outcome of validating an [`ImportConfig`]. Always structured, never an
/// error: probe failures become report entries.
///
/// `complete` covers only the structural checks; `valid` additionally
/// requires the configured source to pass its readiness probe. An
/// incomplete configuration cannot succeed until an operator fixes it,
/// while a complete one with an unreachable source may recover on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub complete: bool,
    pub errors: Vec<String>,
    pub remote_ready: bool,
    pub local_ready: bool,
}

/// One parsed data line, keyed by column name. `number` is the 1-based
/// position among data rows (the header is not counted).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Row {
    pub number: usize,
    pub values: HashMap<String, String>,
}

impl Row {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|v| v.as_str())
    }

    /// The title-bearing value, from `post_title` or `title`
    pub fn title(&self) -> Option<&str> {
        self.get("post_title")
            .or_else(|| self.get("title"))
            .filter(|v| !v.trim().is_empty())
    }
}

/// A parsed CSV document. `headers` preserves source column order.
#[derive(Debug, Clone)]
pub struct CsvDocument {
    pub headers: Vec<String>,
    pub rows: Vec<Row>,
    pub delimiter: char,
}

/// Bookkeeping scope of one run. Created at run start, mutated only by the
/// batch loop, discarded at run end.
#[derive(Debug, Clone)]
pub struct ImportSession {
    pub id: String,
    pub source: SourceKind,
    pub created: usize,
    pub skipped: usize,
    pub errors: usize,
    pub issued_slugs: HashSet<String>,
    pub error_messages: Vec<String>,
    pub started_at: DateTime<Utc>,
}

impl ImportSession {
    pub fn new(source: SourceKind) -> Self {
        Self {
            id: format!(
                "import_{}_{:06x}",
                Utc::now().format("%Y%m%d%H%M%S"),
                fastrand::u32(..0x100_0000)
            ),
            source,
            created: 0,
            skipped: 0,
            errors: 0,
            issued_slugs: HashSet::new(),
            error_messages: Vec::new(),
            started_at: Utc::now(),
        }
    }

    /// Count an error and capture its message while under the capture bound
    pub fn record_error(&mut self, message: String) {
        self.errors += 1;
        if self.error_messages.len() < MAX_CAPTURED_ERRORS {
            self.error_messages.push(message);
        }
    }
}

/// A content record reused as a layout skeleton. Read-only to the pipeline.
#[derive(Debug, Clone)]
pub struct Template {
    pub id: i64,
    pub title: String,
    pub body: String,
    pub meta: Vec<(String, String)>,
}

/// Recurring trigger cadence
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(from = "String", into = "String")]
pub enum Frequency {
    Hourly,
    TwiceDaily,
    Daily,
    Weekly,
    /// Fixed 30-day interval, a documented approximation of a calendar month
    Monthly,
    Every15Min,
    Every30Min,
    /// A cron expression, validated at schedule time
    Custom(String),
}

impl Frequency {
    /// The platform-facing frequency key. Custom cadences pass their cron
    /// expression through unchanged.
    pub fn as_key(&self) -> &str {
        match self {
            Self::Hourly => "hourly",
            Self::TwiceDaily => "twicedaily",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Every15Min => "every_15min",
            Self::Every30Min => "every_30min",
            Self::Custom(expr) => expr,
        }
    }

    /// Fixed interval length, when this cadence has one
    pub fn interval(&self) -> Option<chrono::Duration> {
        match self {
            Self::Hourly => Some(chrono::Duration::hours(1)),
            Self::TwiceDaily => Some(chrono::Duration::hours(12)),
            Self::Daily => Some(chrono::Duration::days(1)),
            Self::Weekly => Some(chrono::Duration::days(7)),
            Self::Monthly => Some(chrono::Duration::days(30)),
            Self::Every15Min => Some(chrono::Duration::minutes(15)),
            Self::Every30Min => Some(chrono::Duration::minutes(30)),
            Self::Custom(_) => None,
        }
    }
}

impl From<String> for Frequency {
    fn from(s: String) -> Self {
        match s.trim().to_lowercase().as_str() {
            "hourly" => Self::Hourly,
            "twicedaily" | "twice_daily" | "twice-daily" => Self::TwiceDaily,
            "daily" => Self::Daily,
            "weekly" => Self::Weekly,
            "monthly" => Self::Monthly,
            "every_15min" | "15min" => Self::Every15Min,
            "every_30min" | "30min" => Self::Every30Min,
            _ => Self::Custom(s),
        }
    }
}

impl From<Frequency> for String {
    fn from(f: Frequency) -> Self {
        f.as_key().to_string()
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_key())
    }
}

/// Options accepted by the schedule operation
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ScheduleOptions {
    /// First run one minute out instead of at the top of the next hour
    #[serde(default)]
    pub start_immediately: bool,
    /// Skip the pre-flight memory/disk headroom checks on trigger
    #[serde(default)]
    pub skip_resource_checks: bool,
}

/// The persisted recurring-trigger configuration. At most one exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub frequency: Frequency,
    pub source: SourceKind,
    #[serde(default)]
    pub options: ScheduleOptions,
    pub next_run_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Per-day trigger counters
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DayStats {
    pub started: u32,
    pub completed: u32,
    pub failed: u32,
    pub processed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentError {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// Rolling scheduler statistics, persisted as one settings value and only
/// ever mutated while the scheduler lock is held.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SchedulerStats {
    /// Keyed by "YYYY-MM-DD"
    #[serde(default)]
    pub days: BTreeMap<String, DayStats>,
    #[serde(default)]
    pub recent_errors: Vec<RecentError>,
}

impl SchedulerStats {
    fn day_entry(&mut self, date: DateTime<Utc>) -> &mut DayStats {
        self.days
            .entry(date.format("%Y-%m-%d").to_string())
            .or_default()
    }

    pub fn record_started(&mut self, at: DateTime<Utc>) {
        self.day_entry(at).started += 1;
    }

    pub fn record_completed(&mut self, at: DateTime<Utc>, processed: u64) {
        let day = self.day_entry(at);
        day.completed += 1;
        day.processed += processed;
    }

    pub fn record_failed(&mut self, at: DateTime<Utc>, message: &str) {
        self.day_entry(at).failed += 1;
        let truncated: String = message.chars().take(MAX_ERROR_TEXT).collect();
        self.recent_errors.push(RecentError {
            at,
            message: truncated,
        });
        if self.recent_errors.len() > MAX_RECENT_ERRORS {
            let excess = self.recent_errors.len() - MAX_RECENT_ERRORS;
            self.recent_errors.drain(..excess);
        }
    }

    /// Drop day buckets older than the retention window
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = (now - chrono::Duration::days(STATS_RETENTION_DAYS))
            .format("%Y-%m-%d")
            .to_string();
        self.days.retain(|day, _| day.as_str() >= cutoff.as_str());
    }
}

/// Overall batch progression for progress events
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BatchState {
    Idle,
    Validating,
    Loading,
    Processing,
    Completed,
    Failed,
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Validating => "validating",
            Self::Loading => "loading",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What started a run, for logging and the concurrent-run check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunTrigger {
    Manual,
    Scheduled,
}

impl fmt::Display for RunTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Manual => "manual",
            Self::Scheduled => "scheduled",
        })
    }
}

/// Structured outcome of one run. The top-level entry point always returns
/// one of these, never a raw error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub success: bool,
    pub message: String,
    pub processed: usize,
    pub total: usize,
    pub created: usize,
    pub skipped: usize,
    pub errors: usize,
    pub error_messages: Vec<String>,
    /// Set when the pipeline itself failed, carrying the failure class
    pub failure: Option<Severity>,
}

impl RunReport {
    /// A report for a run that failed before or outside row processing
    pub fn failure<S: Into<String>>(message: S, severity: Severity) -> Self {
        Self {
            success: false,
            message: message.into(),
            processed: 0,
            total: 0,
            created: 0,
            skipped: 0,
            errors: 0,
            error_messages: Vec::new(),
            failure: Some(severity),
        }
    }
}

/// Events broadcast by the import state manager
#[derive(Debug, Clone)]
pub enum ImportEvent {
    Started { session_id: String },
    Progress {
        processed: usize,
        total: usize,
        state: BatchState,
    },
    RecordCreated { record_id: i64, title: String },
    Completed(RunReport),
    Failed { message: String },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthLevel {
    Good,
    Warning,
    Error,
}

/// Scheduler self-assessment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub overall: HealthLevel,
    pub issues: Vec<String>,
}

impl HealthStatus {
    pub fn good() -> Self {
        Self {
            overall: HealthLevel::Good,
            issues: Vec::new(),
        }
    }
}

/// Read-only scheduler snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerInfo {
    pub is_scheduled: bool,
    pub next_run: Option<DateTime<Utc>>,
    pub frequency: Option<Frequency>,
    pub source: Option<SourceKind>,
    pub stats: SchedulerStats,
    pub health: HealthStatus,
}

/// A stored content record
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ContentRecord {
    pub id: i64,
    pub content_type: String,
    pub status: String,
    pub title: String,
    pub slug: String,
    pub body: String,
    pub excerpt: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for creating a content record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRecord {
    pub content_type: String,
    pub status: String,
    pub title: String,
    pub slug: String,
    pub body: String,
    pub excerpt: String,
}

/// Partial update of an existing record
#[derive(Debug, Clone, Default)]
pub struct RecordUpdate {
    pub title: Option<String>,
    pub body: Option<String>,
    pub excerpt: Option<String>,
    pub status: Option<String>,
}

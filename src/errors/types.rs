//! Error type definitions for the CSV importer
//!
//! This module defines all error types used throughout the application,
//! providing a hierarchical error system that makes debugging and error
//! handling more straightforward. Every `ImportError` variant carries a
//! fixed [`Severity`] so callers classify failures by type, never by
//! matching message text.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How far an error's blast radius reaches.
///
/// `Recoverable` errors are isolated to a single row and converted into
/// counters. `Fatal` errors abort the current run but leave any schedule
/// intact. `Critical` errors additionally auto-disable the schedule, since
/// retrying on the next trigger cannot succeed without operator action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Recoverable,
    Fatal,
    Critical,
}

/// Errors raised by the import pipeline
#[derive(Error, Debug)]
pub enum ImportError {
    /// The import configuration is incomplete or inconsistent
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// A capability the pipeline depends on is missing entirely
    /// (e.g. the content store schema has not been migrated)
    #[error("Missing capability: {capability}")]
    MissingCapability { capability: String },

    /// The source backend could not be reached or read
    #[error("Source unavailable: {message}")]
    SourceUnavailable { message: String },

    /// The source was reachable but returned no data
    #[error("Source is empty: {location}")]
    SourceEmpty { location: String },

    /// The source data could not be parsed as CSV
    #[error("Parse error: {message}")]
    Parse { message: String },

    /// The CSV header is missing required or title-bearing columns
    #[error("Header error: {message}")]
    Header { message: String },

    /// A failure isolated to a single data row
    #[error("Row {row}: {message}")]
    Row { row: usize, message: String },

    /// The content store rejected an operation
    #[error("Store error: {message}")]
    Store { message: String },

    /// The configured template could not be loaded or applied
    #[error("Template error: {message}")]
    Template { message: String },

    /// The run exceeded its configured time limit
    #[error("Import timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// The runtime reported memory exhaustion
    #[error("Out of memory: {message}")]
    OutOfMemory { message: String },

    /// Database-level errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ImportError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a missing-capability error
    pub fn missing_capability<S: Into<String>>(capability: S) -> Self {
        Self::MissingCapability {
            capability: capability.into(),
        }
    }

    /// Create a source-unavailable error
    pub fn source_unavailable<S: Into<String>>(message: S) -> Self {
        Self::SourceUnavailable {
            message: message.into(),
        }
    }

    /// Create a source-empty error
    pub fn source_empty<S: Into<String>>(location: S) -> Self {
        Self::SourceEmpty {
            location: location.into(),
        }
    }

    /// Create a parse error
    pub fn parse<S: Into<String>>(message: S) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Create a header error
    pub fn header<S: Into<String>>(message: S) -> Self {
        Self::Header {
            message: message.into(),
        }
    }

    /// Create a row-scoped error with a 1-based data row number
    pub fn row<S: Into<String>>(row: usize, message: S) -> Self {
        Self::Row {
            row,
            message: message.into(),
        }
    }

    /// Create a store error
    pub fn store<S: Into<String>>(message: S) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Create a template error
    pub fn template<S: Into<String>>(message: S) -> Self {
        Self::Template {
            message: message.into(),
        }
    }

    /// Classify this error's blast radius.
    ///
    /// Row-scoped failures are recoverable; the batch loop counts them and
    /// moves on. Source, parse, header and timeout failures are fatal to the
    /// run. Configuration, missing-capability and out-of-memory failures are
    /// critical: the scheduler disables itself rather than re-trigger a run
    /// that cannot succeed.
    pub fn severity(&self) -> Severity {
        match self {
            Self::Config { .. } | Self::MissingCapability { .. } | Self::OutOfMemory { .. } => {
                Severity::Critical
            }
            Self::SourceUnavailable { .. }
            | Self::SourceEmpty { .. }
            | Self::Parse { .. }
            | Self::Header { .. }
            | Self::Timeout { .. } => Severity::Fatal,
            Self::Row { .. }
            | Self::Store { .. }
            | Self::Template { .. }
            | Self::Database(_)
            | Self::Http(_)
            | Self::Io(_)
            | Self::Serialization(_) => Severity::Recoverable,
        }
    }

    /// True when this failure should auto-disable any active schedule
    pub fn is_critical(&self) -> bool {
        self.severity() == Severity::Critical
    }
}

/// Errors raised by the scheduler surface
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// The scheduler feature is disabled in the application config
    #[error("Scheduler is disabled")]
    Disabled,

    /// The requested frequency is not in the recognized set
    #[error("Invalid frequency: {0}")]
    InvalidFrequency(String),

    /// The requested source kind is not in the recognized set
    #[error("Invalid source: {0}")]
    InvalidSource(String),

    /// The import configuration failed re-validation
    #[error("Import configuration is not valid: {reasons}")]
    ConfigInvalid { reasons: String },

    /// Another import run currently holds the run guard
    #[error("An import is already running")]
    AlreadyRunning,

    /// Pre-flight resource checks failed
    #[error("Insufficient resources: {message}")]
    ResourceHeadroom { message: String },

    /// The trigger platform refused the registration
    #[error("Trigger registration failed: {message}")]
    TriggerRegistration { message: String },

    /// Persisting or reading schedule state failed
    #[error("Schedule persistence failed: {0}")]
    Persistence(#[from] sqlx::Error),

    /// A pipeline failure surfaced through the scheduler
    #[error(transparent)]
    Import(#[from] ImportError),
}

impl SchedulerError {
    /// Create a config-invalid error from validation messages
    pub fn config_invalid<S: Into<String>>(reasons: S) -> Self {
        Self::ConfigInvalid {
            reasons: reasons.into(),
        }
    }

    /// Create a resource-headroom error
    pub fn resource_headroom<S: Into<String>>(message: S) -> Self {
        Self::ResourceHeadroom {
            message: message.into(),
        }
    }

    /// Create a trigger-registration error
    pub fn trigger_registration<S: Into<String>>(message: S) -> Self {
        Self::TriggerRegistration {
            message: message.into(),
        }
    }

    /// True when this failure should auto-disable the schedule
    pub fn is_critical(&self) -> bool {
        match self {
            Self::Import(e) => e.is_critical(),
            Self::ConfigInvalid { .. } => true,
            _ => false,
        }
    }
}

//! Error handling for the CSV importer

pub mod types;

pub use types::{ImportError, SchedulerError, Severity};

/// Convenience result alias for pipeline code
pub type ImportResult<T> = Result<T, ImportError>;

/// Convenience result alias for scheduler code
pub type SchedulerResult<T> = Result<T, SchedulerError>;

//! CSV source acquisition
//!
//! This module acquires raw tabular data from one of the supported backends
//! (remote URL download, local filesystem path) and parses it into a header
//! plus rows. Backends report distinguishable unreachable, empty and
//! malformed outcomes.

use async_trait::async_trait;

use crate::config::HttpConfig;
use crate::errors::{ImportError, ImportResult};
use crate::models::{CsvDocument, SourceConfig, SourceKind};

pub mod local;
pub mod parser;
pub mod remote;

pub use local::LocalSource;
pub use remote::RemoteSource;

/// A source backend. `fetch` returns the raw text; `probe` is the
/// lightweight reachability check used by config validation.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, source: &SourceConfig) -> ImportResult<String>;

    async fn probe(&self, source: &SourceConfig) -> ImportResult<()>;
}

/// Facade over the source backends: fetch by kind, then parse.
pub struct CsvSource {
    remote: RemoteSource,
    local: LocalSource,
}

impl CsvSource {
    pub fn new(http: &HttpConfig) -> Self {
        Self {
            remote: RemoteSource::new(http),
            local: LocalSource::new(http.max_download_bytes),
        }
    }

    fn fetcher(&self, kind: SourceKind) -> &dyn SourceFetcher {
        match kind {
            SourceKind::Remote => &self.remote,
            SourceKind::Local => &self.local,
        }
    }

    /// Acquire and parse the configured source into a document
    pub async fn load(&self, source: &SourceConfig) -> ImportResult<CsvDocument> {
        let text = self.fetcher(source.kind).fetch(source).await?;
        let document = parser::parse(&text, &source.delimiter)?;

        if document.rows.is_empty() {
            return Err(ImportError::source_empty(source.location()));
        }

        Ok(document)
    }

    /// Reachability probe for the configured source
    pub async fn probe(&self, source: &SourceConfig) -> ImportResult<()> {
        self.fetcher(source.kind).probe(source).await
    }
}

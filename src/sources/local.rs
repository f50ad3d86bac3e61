//! Local filesystem source backend

use async_trait::async_trait;
use std::path::Path;
use tracing::debug;

use crate::errors::{ImportError, ImportResult};
use crate::models::SourceConfig;
use crate::sources::SourceFetcher;

pub struct LocalSource {
    max_file_bytes: u64,
}

impl LocalSource {
    pub fn new(max_file_bytes: u64) -> Self {
        Self { max_file_bytes }
    }

    fn path_of<'a>(&self, source: &'a SourceConfig) -> ImportResult<&'a Path> {
        source
            .path
            .as_deref()
            .ok_or_else(|| ImportError::config("local source has no path configured"))
    }
}

#[async_trait]
impl SourceFetcher for LocalSource {
    async fn fetch(&self, source: &SourceConfig) -> ImportResult<String> {
        let path = self.path_of(source)?;
        debug!("Reading CSV from {}", path.display());

        let metadata = tokio::fs::metadata(path).await.map_err(|e| {
            ImportError::source_unavailable(format!("cannot read {}: {e}", path.display()))
        })?;
        if !metadata.is_file() {
            return Err(ImportError::source_unavailable(format!(
                "{} is not a file",
                path.display()
            )));
        }
        if metadata.len() > self.max_file_bytes {
            return Err(ImportError::source_unavailable(format!(
                "{} exceeds the {} byte limit",
                path.display(),
                self.max_file_bytes
            )));
        }

        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            ImportError::source_unavailable(format!("cannot read {}: {e}", path.display()))
        })?;

        if text.trim().is_empty() {
            return Err(ImportError::source_empty(path.display().to_string()));
        }

        Ok(text)
    }

    async fn probe(&self, source: &SourceConfig) -> ImportResult<()> {
        let path = self.path_of(source)?;

        let metadata = tokio::fs::metadata(path).await.map_err(|e| {
            ImportError::source_unavailable(format!("cannot access {}: {e}", path.display()))
        })?;
        if !metadata.is_file() {
            return Err(ImportError::source_unavailable(format!(
                "{} is not a file",
                path.display()
            )));
        }

        // Readability check: opening is the only portable answer
        tokio::fs::File::open(path).await.map_err(|e| {
            ImportError::source_unavailable(format!("cannot open {}: {e}", path.display()))
        })?;

        Ok(())
    }
}

//! Import configuration validation
//!
//! Checks a configuration for completeness and probes source reachability.
//! Always returns a structured report; probe failures become report entries
//! rather than errors.

use std::sync::Arc;
use tracing::debug;

use crate::models::{ImportConfig, SourceKind, ValidationReport};
use crate::sources::{parser, CsvSource};

pub struct ConfigValidator {
    source: Arc<CsvSource>,
}

impl ConfigValidator {
    pub fn new(source: Arc<CsvSource>) -> Self {
        Self { source }
    }

    pub async fn validate(&self, config: &ImportConfig) -> ValidationReport {
        let mut errors = Vec::new();

        if config.content_type.trim().is_empty() {
            errors.push("target content type is empty".to_string());
        }
        if config.source.password.is_some() && config.source.username.is_none() {
            errors.push("a password is configured without a username".to_string());
        }
        if !parser::valid_delimiter_setting(&config.source.delimiter) {
            errors.push(format!(
                "delimiter {:?} is not \"auto\", \"tab\" or a single character",
                config.source.delimiter
            ));
        }
        for column in &config.required_columns {
            if column.trim().is_empty() {
                errors.push("required column list contains an empty name".to_string());
            }
        }

        // Completeness is settled before any probe runs; readiness never
        // makes a configuration structurally invalid
        let complete = errors.is_empty();

        // Probe whichever locations are configured; the configured kind also
        // contributes its problems to the error list.
        let remote_ready = self.probe_remote(config, &mut errors).await;
        let local_ready = self.probe_local(config, &mut errors).await;

        let valid = complete
            && match config.source.kind {
                SourceKind::Remote => remote_ready,
                SourceKind::Local => local_ready,
            };

        debug!(
            valid,
            complete, remote_ready, local_ready, "Import configuration validated"
        );

        ValidationReport {
            valid,
            complete,
            errors,
            remote_ready,
            local_ready,
        }
    }

    async fn probe_remote(&self, config: &ImportConfig, errors: &mut Vec<String>) -> bool {
        let is_configured_kind = config.source.kind == SourceKind::Remote;

        match &config.source.url {
            Some(url) if !url.trim().is_empty() => {
                if url::Url::parse(url).is_err() {
                    if is_configured_kind {
                        errors.push(format!("source URL {url:?} is not a valid URL"));
                    }
                    return false;
                }
                match self.source.probe(&remote_view(config)).await {
                    Ok(()) => true,
                    Err(e) => {
                        if is_configured_kind {
                            errors.push(e.to_string());
                        }
                        false
                    }
                }
            }
            _ => {
                if is_configured_kind {
                    errors.push("remote source has no URL configured".to_string());
                }
                false
            }
        }
    }

    async fn probe_local(&self, config: &ImportConfig, errors: &mut Vec<String>) -> bool {
        let is_configured_kind = config.source.kind == SourceKind::Local;

        match &config.source.path {
            Some(path) if !path.as_os_str().is_empty() => {
                match self.source.probe(&local_view(config)).await {
                    Ok(()) => true,
                    Err(e) => {
                        if is_configured_kind {
                            errors.push(e.to_string());
                        }
                        false
                    }
                }
            }
            _ => {
                if is_configured_kind {
                    errors.push("local source has no path configured".to_string());
                }
                false
            }
        }
    }
}

fn remote_view(config: &ImportConfig) -> crate::models::SourceConfig {
    let mut source = config.source.clone();
    source.kind = SourceKind::Remote;
    source
}

fn local_view(config: &ImportConfig) -> crate::models::SourceConfig {
    let mut source = config.source.clone();
    source.kind = SourceKind::Local;
    source
}

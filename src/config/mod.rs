use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::errors::ImportResult;
use crate::models::ImportConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub http: HttpConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    /// Remote downloads larger than this are rejected
    pub max_download_bytes: u64,
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// Trigger lock self-expires after this many seconds
    pub lock_ttl_secs: u64,
    /// Pre-flight check fails when system memory usage exceeds this
    pub max_memory_usage_percent: f64,
    /// Pre-flight check fails when free disk drops below this
    pub min_free_disk_mb: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://./csv-importer.db".to_string(),
                max_connections: Some(10),
            },
            http: HttpConfig {
                connect_timeout_secs: 10,
                request_timeout_secs: 60,
                max_download_bytes: 50 * 1024 * 1024,
                user_agent: format!("csv-importer/{}", env!("CARGO_PKG_VERSION")),
            },
            scheduler: SchedulerConfig {
                enabled: true,
                lock_ttl_secs: 2 * 60 * 60,
                max_memory_usage_percent: 90.0,
                min_free_disk_mb: 500,
            },
        }
    }
}

impl Config {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_file = match path {
            Some(p) => p.to_path_buf(),
            None => PathBuf::from(
                std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".to_string()),
            ),
        };

        if config_file.exists() {
            let contents = std::fs::read_to_string(&config_file)?;
            Ok(toml::from_str(&contents)?)
        } else {
            let default_config = Self::default();
            let contents = toml::to_string_pretty(&default_config)?;
            std::fs::write(&config_file, contents)?;
            Ok(default_config)
        }
    }
}

/// Supplies the import configuration to runs and the scheduler.
///
/// Keeping this behind a trait means the pipeline never reads configuration
/// from ambient storage; whoever constructs a run decides where its config
/// comes from.
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    async fn import_config(&self) -> ImportResult<ImportConfig>;
}

/// A fixed in-memory configuration, used by file-driven runs and tests
pub struct StaticConfigProvider {
    config: ImportConfig,
}

impl StaticConfigProvider {
    pub fn new(config: ImportConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ConfigProvider for StaticConfigProvider {
    async fn import_config(&self) -> ImportResult<ImportConfig> {
        Ok(self.config.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_round_trips_through_toml() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.database.url, config.database.url);
        assert_eq!(parsed.scheduler.lock_ttl_secs, 2 * 60 * 60);
    }

    #[tokio::test]
    async fn test_static_provider_returns_clone() {
        let mut config = ImportConfig::default();
        config.content_type = "product".to_string();
        let provider = StaticConfigProvider::new(config);
        let loaded = provider.import_config().await.unwrap();
        assert_eq!(loaded.content_type, "product");
    }
}

use anyhow::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{migrate::MigrateDatabase, Pool, Sqlite};

use crate::config::DatabaseConfig;

pub mod content;
pub mod settings;
pub mod traits;

pub use content::SqliteContentStore;
pub use settings::{SettingsConfigProvider, SettingsStore};
pub use traits::ContentStore;

#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    pub fn pool(&self) -> Pool<Sqlite> {
        self.pool.clone()
    }

    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        // Create database if it doesn't exist (for SQLite)
        if !Sqlite::database_exists(&config.url).await? {
            Sqlite::create_database(&config.url).await?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.unwrap_or(10))
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn content(&self) -> SqliteContentStore {
        SqliteContentStore::new(self.pool.clone())
    }

    pub fn settings(&self) -> SettingsStore {
        SettingsStore::new(self.pool.clone())
    }
}

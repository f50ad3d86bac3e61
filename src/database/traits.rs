//! Storage contract consumed by the import pipeline
//!
//! The pipeline is storage-agnostic beyond this trait: everything it needs
//! from the content store is expressed here, and tests may substitute their
//! own implementation.

use async_trait::async_trait;

use crate::errors::ImportResult;
use crate::models::{NewRecord, RecordUpdate, Template};

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Create a content record, returning its id
    async fn create_record(&self, record: &NewRecord) -> ImportResult<i64>;

    /// Apply a partial update to an existing record
    async fn update_record(&self, id: i64, update: &RecordUpdate) -> ImportResult<()>;

    /// Write one meta key/value pair, replacing any existing value
    async fn set_meta(&self, id: i64, key: &str, value: &str) -> ImportResult<()>;

    /// Read one meta value
    async fn get_meta(&self, id: i64, key: &str) -> ImportResult<Option<String>>;

    /// Exact-title lookup within a content type
    async fn find_by_title(&self, title: &str, content_type: &str) -> ImportResult<Option<i64>>;

    /// True when any record already carries this slug
    async fn slug_exists(&self, slug: &str) -> ImportResult<bool>;

    /// The store's standard slugification of a title. `None` when the title
    /// yields nothing usable.
    fn slugify(&self, title: &str) -> Option<String>;

    /// Record a media attachment for a source URL, returning the media id.
    /// The same URL attaches as the same media row across rows and runs.
    async fn attach_media(&self, record_id: i64, url: &str) -> ImportResult<i64>;

    /// Load a template record together with its metadata
    async fn get_template(&self, id: i64) -> ImportResult<Option<Template>>;
}

//! Record creation and the metadata policy
//!
//! Reserved title/body/excerpt/slug columns become the record itself; every
//! other column is written as a prefixed custom field. An image-like column
//! holding a URL becomes a media attachment referenced as the record's
//! thumbnail.

use std::sync::Arc;
use tracing::debug;

use crate::database::ContentStore;
use crate::errors::ImportResult;
use crate::importer::template::TemplateEngine;
use crate::models::{BuilderKind, ImportConfig, NewRecord, RecordUpdate, Row, Template};

/// Columns consumed by the record itself rather than written as meta
pub const RESERVED_KEYS: [&str; 8] = [
    "post_title",
    "title",
    "post_content",
    "content",
    "post_excerpt",
    "excerpt",
    "post_slug",
    "slug",
];

/// Columns treated as the image source, checked in this order
const IMAGE_COLUMNS: [&str; 5] = [
    "image",
    "img",
    "thumbnail",
    "featured_image",
    "featured-image",
];

pub struct RecordWriter {
    store: Arc<dyn ContentStore>,
}

impl RecordWriter {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &dyn ContentStore {
        self.store.as_ref()
    }

    /// Create the content record from the row's reserved fields
    pub async fn create(
        &self,
        row: &Row,
        config: &ImportConfig,
        title: &str,
        slug: &str,
    ) -> ImportResult<i64> {
        let record = NewRecord {
            content_type: config.content_type.clone(),
            status: config.status.clone(),
            title: title.to_string(),
            slug: slug.to_string(),
            body: first_of(row, &["post_content", "content"]),
            excerpt: first_of(row, &["post_excerpt", "excerpt"]),
        };

        let record_id = self.store.create_record(&record).await?;
        debug!(record_id, title, "Created content record");
        Ok(record_id)
    }

    /// Write every non-reserved column as a prefixed custom field, in sorted
    /// key order. Returns how many fields were written.
    pub async fn write_meta(
        &self,
        record_id: i64,
        row: &Row,
        config: &ImportConfig,
    ) -> ImportResult<usize> {
        let mut keys: Vec<&String> = row
            .values
            .keys()
            .filter(|key| !is_reserved(key))
            .collect();
        keys.sort();

        for key in &keys {
            let meta_key = meta_key_for(key, &config.meta_prefix);
            self.store
                .set_meta(record_id, &meta_key, &row.values[*key])
                .await?;
        }

        Ok(keys.len())
    }

    /// Apply a template: the substituted body replaces the record body, the
    /// substituted template metadata and the builder contract flags become
    /// record meta.
    pub async fn attach_template(
        &self,
        record_id: i64,
        template: &Template,
        builder: BuilderKind,
        row: &Row,
        engine: &TemplateEngine,
    ) -> ImportResult<()> {
        let body = engine.render_body(template, builder, row);
        self.store
            .update_record(
                record_id,
                &RecordUpdate {
                    body: Some(body),
                    ..RecordUpdate::default()
                },
            )
            .await?;

        for (key, value) in engine.render_meta(template, builder, row) {
            self.store.set_meta(record_id, &key, &value).await?;
        }

        Ok(())
    }

    /// Attach the row's image column as the record's thumbnail, when an
    /// image-like column holds a parseable URL
    pub async fn attach_image(&self, record_id: i64, row: &Row) -> ImportResult<Option<i64>> {
        let Some(url) = image_url(row) else {
            return Ok(None);
        };

        let media_id = self.store.attach_media(record_id, url).await?;
        self.store
            .set_meta(record_id, "_thumbnail_id", &media_id.to_string())
            .await?;

        debug!(record_id, media_id, "Attached media from {url}");
        Ok(Some(media_id))
    }
}

fn is_reserved(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

/// Prefix a column name unless it already carries the prefix
fn meta_key_for(key: &str, prefix: &str) -> String {
    if key.starts_with(prefix) {
        key.to_string()
    } else {
        format!("{prefix}{key}")
    }
}

fn first_of(row: &Row, keys: &[&str]) -> String {
    keys.iter()
        .find_map(|key| row.get(key))
        .unwrap_or_default()
        .to_string()
}

fn image_url(row: &Row) -> Option<&str> {
    for column in IMAGE_COLUMNS {
        if let Some(value) = row.get(column) {
            let value = value.trim();
            if !value.is_empty() && url::Url::parse(value).is_ok() {
                return Some(value);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn row(pairs: &[(&str, &str)]) -> Row {
        Row {
            number: 1,
            values: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_meta_key_prefixing() {
        assert_eq!(meta_key_for("price", "csv_"), "csv_price");
        assert_eq!(meta_key_for("csv_price", "csv_"), "csv_price");
    }

    #[test]
    fn test_reserved_keys_cover_both_spellings() {
        assert!(is_reserved("post_title"));
        assert!(is_reserved("title"));
        assert!(is_reserved("slug"));
        assert!(!is_reserved("price"));
        assert!(!is_reserved("csv_title"));
    }

    #[test]
    fn test_body_and_excerpt_extraction() {
        let r = row(&[("content", "b"), ("post_excerpt", "e")]);
        assert_eq!(first_of(&r, &["post_content", "content"]), "b");
        assert_eq!(first_of(&r, &["post_excerpt", "excerpt"]), "e");
        assert_eq!(first_of(&row(&[]), &["post_content", "content"]), "");
    }

    #[test]
    fn test_image_url_detection() {
        let r = row(&[("image", "https://example.com/a.jpg")]);
        assert_eq!(image_url(&r), Some("https://example.com/a.jpg"));

        let r = row(&[("image", "not a url")]);
        assert_eq!(image_url(&r), None);

        let r = row(&[("thumbnail", " https://example.com/t.png ")]);
        assert_eq!(image_url(&r), Some("https://example.com/t.png"));

        let r = row(&[("unrelated", "https://example.com/x.png")]);
        assert_eq!(image_url(&r), None);
    }

    #[test]
    fn test_image_column_order_prefers_image() {
        let mut values = HashMap::new();
        values.insert("img".to_string(), "https://example.com/b.jpg".to_string());
        values.insert("image".to_string(), "https://example.com/a.jpg".to_string());
        let r = Row { number: 1, values };
        assert_eq!(image_url(&r), Some("https://example.com/a.jpg"));
    }
}

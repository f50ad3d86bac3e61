//! SQLite implementation of the content store

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::{Pool, Row as SqlxRow, Sqlite};

use crate::database::traits::ContentStore;
use crate::errors::{ImportError, ImportResult};
use crate::models::{NewRecord, RecordUpdate, Template};

#[derive(Clone)]
pub struct SqliteContentStore {
    pool: Pool<Sqlite>,
}

impl SqliteContentStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }
}

/// Standard slug transform: lowercase, alphanumeric runs joined by single
/// hyphens. Returns `None` when nothing survives the transform.
pub fn slugify(title: &str) -> Option<String> {
    let mut slug = String::with_capacity(title.len());
    let mut last_was_hyphen = true;
    for c in title.chars() {
        if c.is_alphanumeric() {
            for lower in c.to_lowercase() {
                slug.push(lower);
            }
            last_was_hyphen = false;
        } else if !last_was_hyphen {
            slug.push('-');
            last_was_hyphen = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        None
    } else {
        Some(slug)
    }
}

fn url_hash(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[async_trait]
impl ContentStore for SqliteContentStore {
    async fn create_record(&self, record: &NewRecord) -> ImportResult<i64> {
        if record.content_type.trim().is_empty() {
            return Err(ImportError::store("content type must not be empty"));
        }
        if record.title.trim().is_empty() {
            return Err(ImportError::store("title must not be empty"));
        }

        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO content_records (content_type, status, title, slug, body, excerpt, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.content_type)
        .bind(&record.status)
        .bind(&record.title)
        .bind(&record.slug)
        .bind(&record.body)
        .bind(&record.excerpt)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| ImportError::store(format!("failed to create record: {e}")))?;

        Ok(result.last_insert_rowid())
    }

    async fn update_record(&self, id: i64, update: &RecordUpdate) -> ImportResult<()> {
        let mut sets = Vec::new();
        if update.title.is_some() {
            sets.push("title = ?");
        }
        if update.body.is_some() {
            sets.push("body = ?");
        }
        if update.excerpt.is_some() {
            sets.push("excerpt = ?");
        }
        if update.status.is_some() {
            sets.push("status = ?");
        }
        if sets.is_empty() {
            return Ok(());
        }

        let sql = format!(
            "UPDATE content_records SET {}, updated_at = ? WHERE id = ?",
            sets.join(", ")
        );
        let mut query = sqlx::query(&sql);
        if let Some(title) = &update.title {
            query = query.bind(title);
        }
        if let Some(body) = &update.body {
            query = query.bind(body);
        }
        if let Some(excerpt) = &update.excerpt {
            query = query.bind(excerpt);
        }
        if let Some(status) = &update.status {
            query = query.bind(status);
        }
        query
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| ImportError::store(format!("failed to update record {id}: {e}")))?;

        Ok(())
    }

    async fn set_meta(&self, id: i64, key: &str, value: &str) -> ImportResult<()> {
        sqlx::query(
            "INSERT INTO record_meta (record_id, meta_key, meta_value) VALUES (?, ?, ?)
             ON CONFLICT (record_id, meta_key) DO UPDATE SET meta_value = excluded.meta_value",
        )
        .bind(id)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_meta(&self, id: i64, key: &str) -> ImportResult<Option<String>> {
        let value = sqlx::query_scalar::<_, String>(
            "SELECT meta_value FROM record_meta WHERE record_id = ? AND meta_key = ?",
        )
        .bind(id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(value)
    }

    async fn find_by_title(&self, title: &str, content_type: &str) -> ImportResult<Option<i64>> {
        let id = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM content_records WHERE title = ? AND content_type = ? LIMIT 1",
        )
        .bind(title)
        .bind(content_type)
        .fetch_optional(&self.pool)
        .await?;

        Ok(id)
    }

    async fn slug_exists(&self, slug: &str) -> ImportResult<bool> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM content_records WHERE slug = ?",
        )
        .bind(slug)
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }

    fn slugify(&self, title: &str) -> Option<String> {
        slugify(title)
    }

    async fn attach_media(&self, record_id: i64, url: &str) -> ImportResult<i64> {
        let hash = url_hash(url);

        // The URL hash is the media identity: a URL seen before attaches as
        // the existing row instead of a duplicate.
        let existing = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM media WHERE url_hash = ? LIMIT 1",
        )
        .bind(&hash)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(id) = existing {
            return Ok(id);
        }

        let result = sqlx::query(
            "INSERT INTO media (record_id, source_url, url_hash, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(record_id)
        .bind(url)
        .bind(&hash)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn get_template(&self, id: i64) -> ImportResult<Option<Template>> {
        let row = sqlx::query("SELECT id, title, body FROM content_records WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let meta_rows = sqlx::query(
            "SELECT meta_key, meta_value FROM record_meta WHERE record_id = ? ORDER BY meta_key",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let meta = meta_rows
            .into_iter()
            .map(|r| (r.get("meta_key"), r.get("meta_value")))
            .collect();

        Ok(Some(Template {
            id: row.get("id"),
            title: row.get("title"),
            body: row.get("body"),
            meta,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify_basic() {
        assert_eq!(slugify("Hello World"), Some("hello-world".to_string()));
        assert_eq!(slugify("  Foo  Bar  "), Some("foo-bar".to_string()));
        assert_eq!(slugify("Crème Brûlée"), Some("crème-brûlée".to_string()));
        assert_eq!(slugify("A/B: Test!"), Some("a-b-test".to_string()));
    }

    #[test]
    fn test_slugify_nothing_usable() {
        assert_eq!(slugify(""), None);
        assert_eq!(slugify("!!! ---"), None);
    }

    #[test]
    fn test_url_hash_is_stable() {
        let a = url_hash("https://example.com/image.jpg");
        let b = url_hash("https://example.com/image.jpg");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, url_hash("https://example.com/other.jpg"));
    }
}

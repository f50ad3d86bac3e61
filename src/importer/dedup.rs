//! Duplicate detection
//!
//! Comparison is by exact title match within the target content type. No
//! normalization or fuzzy matching: "Foo" and "foo " are distinct titles.

use crate::database::ContentStore;
use crate::errors::ImportResult;

/// Whether a record with this title already exists in the content type.
/// Consulted only when the configuration enables duplicate skipping.
pub async fn exists(
    store: &dyn ContentStore,
    title: &str,
    content_type: &str,
) -> ImportResult<bool> {
    Ok(store.find_by_title(title, content_type).await?.is_some())
}

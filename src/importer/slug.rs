//! Collision-free slug generation
//!
//! A slug issued here is absent from both the session's already-issued set
//! and the persistent store, which keeps slugs unique within one run even
//! before storage commits are visible.

use crate::database::ContentStore;
use crate::errors::ImportResult;
use crate::models::ImportSession;

/// Placeholder slug for titles the store cannot slugify
fn fallback_slug() -> String {
    format!("import-post-{:06x}", fastrand::u32(..0x100_0000))
}

/// Produce a unique slug for a title. Collisions append -1, -2, ... until a
/// free candidate is found; the issued slug is recorded in the session.
pub async fn unique(
    store: &dyn ContentStore,
    session: &mut ImportSession,
    title: &str,
) -> ImportResult<String> {
    let base = store.slugify(title).unwrap_or_else(fallback_slug);

    let mut candidate = base.clone();
    let mut suffix = 0usize;
    loop {
        let taken =
            session.issued_slugs.contains(&candidate) || store.slug_exists(&candidate).await?;
        if !taken {
            session.issued_slugs.insert(candidate.clone());
            return Ok(candidate);
        }
        suffix += 1;
        candidate = format!("{base}-{suffix}");
    }
}

//! End-to-end import pipeline testing
//!
//! Exercises the full run path against a real SQLite store and CSV files on
//! disk: parsing and delimiter detection, column mapping, deduplication,
//! slug allocation, template substitution, metadata and media writes, and
//! the partial-failure accounting that keeps one bad row from sinking a
//! batch.

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use csv_importer::{
    config::{DatabaseConfig, HttpConfig, StaticConfigProvider},
    database::{ContentStore, Database},
    errors::Severity,
    importer::{ConfigValidator, ImportRun, ImportStateManager},
    models::{
        BatchState, BuilderKind, ImportConfig, ImportEvent, NewRecord, RunReport, RunTrigger,
        SourceConfig, SourceKind,
    },
    sources::CsvSource,
};

fn test_http_config() -> HttpConfig {
    HttpConfig {
        connect_timeout_secs: 5,
        request_timeout_secs: 10,
        max_download_bytes: 10 * 1024 * 1024,
        user_agent: "csv-importer-tests".to_string(),
    }
}

async fn create_test_database() -> Database {
    let database = Database::new(&DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        // In-memory SQLite vanishes when its connection closes, so the pool
        // must hold exactly one
        max_connections: Some(1),
    })
    .await
    .expect("failed to open in-memory database");
    database.migrate().await.expect("failed to run migrations");
    database
}

fn write_csv(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).expect("failed to write CSV fixture");
    path
}

fn local_config(path: PathBuf) -> ImportConfig {
    ImportConfig {
        source: SourceConfig {
            kind: SourceKind::Local,
            path: Some(path),
            ..SourceConfig::default()
        },
        throttle_pause_ms: 0,
        ..ImportConfig::default()
    }
}

async fn run_import(database: &Database, config: ImportConfig) -> RunReport {
    let runner = ImportRun::new(
        Arc::new(StaticConfigProvider::new(config)),
        Arc::new(CsvSource::new(&test_http_config())),
        Arc::new(database.content()),
        database.settings(),
        ImportStateManager::new(),
    );
    runner.execute(RunTrigger::Manual).await
}

async fn record_count(database: &Database) -> i64 {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM content_records")
        .fetch_one(&database.pool())
        .await
        .unwrap()
}

async fn record_id_by_title(database: &Database, title: &str) -> i64 {
    sqlx::query_scalar::<_, i64>("SELECT id FROM content_records WHERE title = ?")
        .bind(title)
        .fetch_one(&database.pool())
        .await
        .unwrap()
}

// =============================================================================
// CLEAN RUNS
// =============================================================================

#[tokio::test]
async fn test_clean_csv_creates_every_row() {
    let database = create_test_database().await;
    let dir = TempDir::new().unwrap();
    let path = write_csv(
        &dir,
        "widgets.csv",
        "post_title,price,color\n\
         Red Widget,9.99,red\n\
         Blue Widget,19.99,blue\n\
         Green Widget,4.25,green\n",
    );

    let report = run_import(&database, local_config(path)).await;

    assert!(report.success, "unexpected failure: {}", report.message);
    assert_eq!(report.processed, 3);
    assert_eq!(report.total, 3);
    assert_eq!(report.created, 3);
    assert_eq!(report.skipped, 0);
    assert_eq!(report.errors, 0);
    assert!(report.failure.is_none());
    assert_eq!(record_count(&database).await, 3);

    // Non-reserved columns land as prefixed custom fields
    let store = database.content();
    let id = record_id_by_title(&database, "Red Widget").await;
    assert_eq!(
        store.get_meta(id, "csv_price").await.unwrap(),
        Some("9.99".to_string())
    );
    assert_eq!(
        store.get_meta(id, "csv_color").await.unwrap(),
        Some("red".to_string())
    );
    // Reserved title column never becomes a custom field
    assert_eq!(store.get_meta(id, "csv_post_title").await.unwrap(), None);

    let slug = sqlx::query_scalar::<_, String>("SELECT slug FROM content_records WHERE id = ?")
        .bind(id)
        .fetch_one(&database.pool())
        .await
        .unwrap();
    assert_eq!(slug, "red-widget");
}

#[tokio::test]
async fn test_semicolon_delimiter_is_autodetected() {
    let database = create_test_database().await;
    let dir = TempDir::new().unwrap();
    let path = write_csv(
        &dir,
        "semicolons.csv",
        "post_title;price\nWidget;9\nGadget;12\n",
    );

    let report = run_import(&database, local_config(path)).await;

    assert!(report.success, "unexpected failure: {}", report.message);
    assert_eq!(report.created, 2);

    let store = database.content();
    let id = record_id_by_title(&database, "Widget").await;
    assert_eq!(
        store.get_meta(id, "csv_price").await.unwrap(),
        Some("9".to_string())
    );
}

#[tokio::test]
async fn test_column_mapping_feeds_reserved_fields() {
    let database = create_test_database().await;
    let dir = TempDir::new().unwrap();
    let path = write_csv(&dir, "mapped.csv", "name,cost\nLamp,30\nDesk,120\n");

    let mut config = local_config(path);
    config.column_mapping = [
        ("name".to_string(), "post_title".to_string()),
        ("cost".to_string(), "price".to_string()),
    ]
    .into_iter()
    .collect();

    let report = run_import(&database, config).await;

    // The header itself has no title column; the mapping supplies it per row
    assert!(report.success, "unexpected failure: {}", report.message);
    assert_eq!(report.created, 2);

    let store = database.content();
    let id = record_id_by_title(&database, "Lamp").await;
    // Both the mapped target and the original column survive as meta
    assert_eq!(
        store.get_meta(id, "csv_price").await.unwrap(),
        Some("30".to_string())
    );
    assert_eq!(
        store.get_meta(id, "csv_cost").await.unwrap(),
        Some("30".to_string())
    );
}

// =============================================================================
// DEDUPLICATION AND SLUGS
// =============================================================================

#[tokio::test]
async fn test_duplicate_titles_skip_when_configured() {
    let database = create_test_database().await;
    let store = database.content();
    store
        .create_record(&NewRecord {
            content_type: "post".to_string(),
            status: "draft".to_string(),
            title: "Existing Product".to_string(),
            slug: "existing-product".to_string(),
            body: String::new(),
            excerpt: String::new(),
        })
        .await
        .unwrap();

    let dir = TempDir::new().unwrap();
    let path = write_csv(
        &dir,
        "dupes.csv",
        "post_title\nExisting Product\nBrand New Product\n",
    );

    let mut config = local_config(path);
    config.skip_duplicates = true;

    let report = run_import(&database, config).await;

    assert!(report.success, "unexpected failure: {}", report.message);
    assert_eq!(report.created, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.errors, 0);
    // One pre-existing plus one new
    assert_eq!(record_count(&database).await, 2);
}

#[tokio::test]
async fn test_duplicate_titles_create_suffixed_slugs_when_not_skipping() {
    let database = create_test_database().await;
    let dir = TempDir::new().unwrap();
    let path = write_csv(&dir, "same-title.csv", "post_title\nGadget\nGadget\nGadget\n");

    let report = run_import(&database, local_config(path)).await;

    assert!(report.success, "unexpected failure: {}", report.message);
    assert_eq!(report.created, 3);
    assert_eq!(report.skipped, 0);

    let slugs = sqlx::query_scalar::<_, String>(
        "SELECT slug FROM content_records ORDER BY id",
    )
    .fetch_all(&database.pool())
    .await
    .unwrap();
    assert_eq!(slugs, vec!["gadget", "gadget-1", "gadget-2"]);
}

#[tokio::test]
async fn test_explicit_slug_column_seeds_the_slug() {
    let database = create_test_database().await;
    let dir = TempDir::new().unwrap();
    let path = write_csv(
        &dir,
        "slugged.csv",
        "post_title,post_slug\nSome Long Title,short-handle\n",
    );

    let report = run_import(&database, local_config(path)).await;

    assert!(report.success, "unexpected failure: {}", report.message);
    let slug = sqlx::query_scalar::<_, String>("SELECT slug FROM content_records LIMIT 1")
        .fetch_one(&database.pool())
        .await
        .unwrap();
    assert_eq!(slug, "short-handle");
}

// =============================================================================
// PARTIAL FAILURES
// =============================================================================

#[tokio::test]
async fn test_one_bad_row_does_not_sink_the_batch() {
    let database = create_test_database().await;
    let dir = TempDir::new().unwrap();
    let path = write_csv(
        &dir,
        "mixed.csv",
        "post_title,price\nAlpha,1\n,2\nBeta,3\nGamma,4\n",
    );

    let report = run_import(&database, local_config(path)).await;

    // Row errors make the run unsuccessful but never a pipeline failure
    assert!(!report.success);
    assert!(report.failure.is_none());
    assert_eq!(report.processed, 4);
    assert_eq!(report.total, 4);
    assert_eq!(report.created, 3);
    assert_eq!(report.errors, 1);
    assert_eq!(report.error_messages.len(), 1);
    assert!(
        report.error_messages[0].contains("Row 2"),
        "unexpected message: {}",
        report.error_messages[0]
    );
    assert_eq!(record_count(&database).await, 3);
}

#[tokio::test]
async fn test_missing_title_header_fails_before_any_row() {
    let database = create_test_database().await;
    let dir = TempDir::new().unwrap();
    let path = write_csv(&dir, "untitled.csv", "name,price\nAlpha,1\nBeta,2\n");

    let report = run_import(&database, local_config(path)).await;

    assert!(!report.success);
    assert!(report.failure.is_some());
    assert_eq!(report.created, 0);
    assert!(
        report.message.contains("post_title"),
        "unexpected message: {}",
        report.message
    );
    assert_eq!(record_count(&database).await, 0);
}

#[tokio::test]
async fn test_missing_required_column_aborts_the_batch() {
    let database = create_test_database().await;
    let dir = TempDir::new().unwrap();
    let path = write_csv(&dir, "no-sku.csv", "post_title,price\nAlpha,1\n");

    let mut config = local_config(path);
    config.required_columns = vec!["sku".to_string()];

    let report = run_import(&database, config).await;

    assert!(!report.success);
    assert!(report.failure.is_some());
    assert_eq!(report.created, 0);
    assert!(
        report.message.contains("sku"),
        "unexpected message: {}",
        report.message
    );
    assert_eq!(record_count(&database).await, 0);
}

#[tokio::test]
async fn test_empty_csv_is_a_pipeline_failure() {
    let database = create_test_database().await;
    let dir = TempDir::new().unwrap();
    let path = write_csv(&dir, "empty.csv", "");

    let report = run_import(&database, local_config(path)).await;

    assert!(!report.success);
    assert!(report.failure.is_some());
    assert_eq!(record_count(&database).await, 0);
}

#[tokio::test]
async fn test_validation_separates_completeness_from_readiness() {
    let validator = ConfigValidator::new(Arc::new(CsvSource::new(&test_http_config())));
    let dir = TempDir::new().unwrap();
    let path = write_csv(&dir, "ready.csv", "post_title\nWidget\n");

    let report = validator.validate(&local_config(path.clone())).await;
    assert!(report.complete);
    assert!(report.valid);
    assert!(report.local_ready);

    // An unreachable file leaves the configuration complete but not valid
    let report = validator
        .validate(&local_config(PathBuf::from("/nonexistent/import.csv")))
        .await;
    assert!(report.complete);
    assert!(!report.valid);
    assert!(!report.local_ready);
    assert!(!report.errors.is_empty());

    // A malformed delimiter is structural and fails completeness outright
    let mut config = local_config(path);
    config.source.delimiter = ";;".to_string();
    let report = validator.validate(&config).await;
    assert!(!report.complete);
    assert!(!report.valid);
    assert!(report
        .errors
        .iter()
        .any(|message| message.contains("delimiter")));
}

#[tokio::test]
async fn test_missing_local_file_is_a_fatal_run_failure() {
    let database = create_test_database().await;
    let report = run_import(
        &database,
        local_config(PathBuf::from("/nonexistent/import.csv")),
    )
    .await;

    assert!(!report.success);
    // An unreachable source is an outage, never a configuration defect
    assert_eq!(report.failure, Some(Severity::Fatal));
    assert!(
        report.message.contains("Source unavailable"),
        "unexpected message: {}",
        report.message
    );
}

#[tokio::test]
async fn test_row_error_flood_aborts_with_partial_results() {
    let database = create_test_database().await;
    let dir = TempDir::new().unwrap();

    // Five good rows, then a flood of titleless ones
    let mut csv = String::from("post_title,price\n");
    for i in 0..5 {
        csv.push_str(&format!("Keeper {i},{i}\n"));
    }
    for i in 0..55 {
        csv.push_str(&format!(",{i}\n"));
    }
    let path = write_csv(&dir, "flood.csv", &csv);

    let report = run_import(&database, local_config(path)).await;

    // The 51st row error trips the ceiling; the remaining rows are left
    // unread and the batch still counts as completed, not failed
    assert!(!report.success);
    assert_eq!(report.failure, None);
    assert_eq!(report.errors, 51);
    assert_eq!(report.created, 5);
    assert_eq!(report.processed, 56);
    assert_eq!(report.total, 60);
    assert_eq!(report.error_messages.len(), 10);
    assert_eq!(record_count(&database).await, 5);
}

#[tokio::test]
async fn test_failed_run_emits_a_single_failed_transition() {
    let database = create_test_database().await;
    let dir = TempDir::new().unwrap();
    let path = write_csv(&dir, "no-sku.csv", "post_title,price\nAlpha,1\n");

    let mut config = local_config(path);
    config.required_columns = vec!["sku".to_string()];

    let state = ImportStateManager::new();
    let mut events = state.subscribe();
    let runner = ImportRun::new(
        Arc::new(StaticConfigProvider::new(config)),
        Arc::new(CsvSource::new(&test_http_config())),
        Arc::new(database.content()),
        database.settings(),
        state,
    );
    let report = runner.execute(RunTrigger::Manual).await;
    assert!(!report.success);

    // Subscribers see exactly one Failed state change and one terminal
    // failure event, however many stages the abort passed through
    let mut failed_states = 0;
    let mut failed_events = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            ImportEvent::Progress {
                state: BatchState::Failed,
                ..
            } => failed_states += 1,
            ImportEvent::Failed { .. } => failed_events += 1,
            _ => {}
        }
    }
    assert_eq!(failed_states, 1);
    assert_eq!(failed_events, 1);
}

// =============================================================================
// TEMPLATES
// =============================================================================

async fn create_template(database: &Database, body: &str, meta: &[(&str, &str)]) -> i64 {
    let store = database.content();
    let id = store
        .create_record(&NewRecord {
            content_type: "template".to_string(),
            status: "publish".to_string(),
            title: "Product Layout".to_string(),
            slug: "product-layout".to_string(),
            body: body.to_string(),
            excerpt: String::new(),
        })
        .await
        .unwrap();
    for (key, value) in meta {
        store.set_meta(id, key, value).await.unwrap();
    }
    id
}

#[tokio::test]
async fn test_template_body_substitution_end_to_end() {
    let database = create_test_database().await;
    let template_id = create_template(
        &database,
        "<h1>{{post_title}}</h1><p>Price: {{price}}</p><p>{{warranty}}</p>",
        &[],
    )
    .await;

    let dir = TempDir::new().unwrap();
    let path = write_csv(&dir, "templated.csv", "post_title,price\nWidget,9\n");

    let mut config = local_config(path);
    config.template_id = Some(template_id);
    config.builder = BuilderKind::Plain;

    let report = run_import(&database, config).await;
    assert!(report.success, "unexpected failure: {}", report.message);

    // Matched placeholders substitute, unmatched ones survive verbatim
    let id = record_id_by_title(&database, "Widget").await;
    let body = sqlx::query_scalar::<_, String>("SELECT body FROM content_records WHERE id = ?")
        .bind(id)
        .fetch_one(&database.pool())
        .await
        .unwrap();
    assert_eq!(body, "<h1>Widget</h1><p>Price: 9</p><p>{{warranty}}</p>");
}

#[tokio::test]
async fn test_structured_template_substitutes_inside_json_leaves() {
    let database = create_test_database().await;
    let template_id = create_template(
        &database,
        r#"[{"elType":"section","settings":{"title":"{{post_title}}","price_label":"{{price}} USD"}}]"#,
        &[("_template_origin", "import")],
    )
    .await;

    let dir = TempDir::new().unwrap();
    let path = write_csv(&dir, "structured.csv", "post_title,price\nLamp,30\n");

    let mut config = local_config(path);
    config.template_id = Some(template_id);
    config.builder = BuilderKind::Elementor;

    let report = run_import(&database, config).await;
    assert!(report.success, "unexpected failure: {}", report.message);

    let id = record_id_by_title(&database, "Lamp").await;
    let body = sqlx::query_scalar::<_, String>("SELECT body FROM content_records WHERE id = ?")
        .bind(id)
        .fetch_one(&database.pool())
        .await
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(parsed[0]["settings"]["title"], "Lamp");
    assert_eq!(parsed[0]["settings"]["price_label"], "30 USD");

    // Template meta carries over and the builder contract flags are present
    let store = database.content();
    assert_eq!(
        store.get_meta(id, "_template_origin").await.unwrap(),
        Some("import".to_string())
    );
    assert_eq!(
        store.get_meta(id, "_elementor_edit_mode").await.unwrap(),
        Some("builder".to_string())
    );
    assert_eq!(
        store.get_meta(id, "_elementor_template_type").await.unwrap(),
        Some("wp-page".to_string())
    );
}

#[tokio::test]
async fn test_dangling_template_id_fails_the_run() {
    let database = create_test_database().await;
    let dir = TempDir::new().unwrap();
    let path = write_csv(&dir, "orphan.csv", "post_title\nWidget\n");

    let mut config = local_config(path);
    config.template_id = Some(9999);

    let report = run_import(&database, config).await;

    assert!(!report.success);
    assert!(report.failure.is_some());
    assert_eq!(record_count(&database).await, 0);
}

// =============================================================================
// MEDIA
// =============================================================================

#[tokio::test]
async fn test_image_column_attaches_media_once_per_url() {
    let database = create_test_database().await;
    let dir = TempDir::new().unwrap();
    let path = write_csv(
        &dir,
        "images.csv",
        "post_title,image\n\
         First,https://example.com/shared.jpg\n\
         Second,https://example.com/shared.jpg\n\
         Third,not a url\n",
    );

    let mut config = local_config(path);
    config.attach_images = true;

    let report = run_import(&database, config).await;
    assert!(report.success, "unexpected failure: {}", report.message);
    assert_eq!(report.created, 3);

    // The same URL resolves to the same media row across rows
    let media_count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM media")
        .fetch_one(&database.pool())
        .await
        .unwrap();
    assert_eq!(media_count, 1);

    let store = database.content();
    let first = record_id_by_title(&database, "First").await;
    let second = record_id_by_title(&database, "Second").await;
    let third = record_id_by_title(&database, "Third").await;
    let first_thumb = store.get_meta(first, "_thumbnail_id").await.unwrap();
    assert!(first_thumb.is_some());
    assert_eq!(store.get_meta(second, "_thumbnail_id").await.unwrap(), first_thumb);
    // An unparseable value is ignored rather than failing the row
    assert_eq!(store.get_meta(third, "_thumbnail_id").await.unwrap(), None);
}

// =============================================================================
// RUN MARKERS
// =============================================================================

#[tokio::test]
async fn test_transient_run_markers_are_cleared_after_the_run() {
    let database = create_test_database().await;
    let dir = TempDir::new().unwrap();
    let path = write_csv(&dir, "markers.csv", "post_title\nWidget\n");

    let report = run_import(&database, local_config(path)).await;
    assert!(report.success, "unexpected failure: {}", report.message);

    let settings = database.settings();
    let session: Option<String> = settings.get("run_session_id").await.unwrap();
    let header: Option<Vec<String>> = settings.get("run_header").await.unwrap();
    assert_eq!(session, None);
    assert_eq!(header, None);
}

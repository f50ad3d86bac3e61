//! The row-processing loop
//!
//! Drives per-row mapping, deduplication, slug generation, record creation,
//! template application and metadata writes. Every row is independently
//! isolated: a failing row becomes a counter and a bounded captured message,
//! never an abort. Only a missing required column aborts the batch before
//! any row is processed.

use std::time::Duration;
use tracing::{debug, warn};

use crate::errors::{ImportError, ImportResult};
use crate::importer::state_manager::ImportStateManager;
use crate::importer::template::TemplateEngine;
use crate::importer::writer::RecordWriter;
use crate::importer::{dedup, mapper, slug};
use crate::models::{BatchState, CsvDocument, ImportConfig, ImportSession, Row, Template};

/// Row errors past this count abort the remaining rows. The run still
/// completes with partial results; this is a safety valve, not a failure.
pub const MAX_ROW_ERRORS: usize = 50;

/// Progress is broadcast every this many rows
pub const PROGRESS_EVERY: usize = 5;

/// The cooperative pause is inserted every this many rows
pub const THROTTLE_EVERY: usize = 10;

enum RowOutcome {
    Created { record_id: i64, title: String },
    Skipped,
}

pub struct BatchOrchestrator {
    writer: RecordWriter,
    engine: TemplateEngine,
    state: ImportStateManager,
}

impl BatchOrchestrator {
    pub fn new(writer: RecordWriter, state: ImportStateManager) -> Self {
        Self {
            writer,
            engine: TemplateEngine::new(),
            state,
        }
    }

    /// Process a loaded document. Returns the number of rows attempted; the
    /// per-row counters accumulate in the session. An error from here is
    /// always pipeline-level.
    pub async fn run(
        &self,
        document: &CsvDocument,
        config: &ImportConfig,
        template: Option<&Template>,
        session: &mut ImportSession,
    ) -> ImportResult<usize> {
        let total = document.rows.len();

        // The caller owns the Failed transition, so an abort here must not
        // broadcast one of its own
        check_required_columns(&document.headers, &config.required_columns)?;

        self.state.update(BatchState::Processing, 0, total).await;

        let mut processed = 0usize;
        for row in &document.rows {
            if session.errors > MAX_ROW_ERRORS {
                warn!(
                    "Aborting batch after {} row errors, {} of {} rows processed",
                    session.errors, processed, total
                );
                break;
            }

            match self.process_row(row, config, template, session).await {
                Ok(RowOutcome::Created { record_id, title }) => {
                    session.created += 1;
                    self.state.record_created(record_id, &title);
                }
                Ok(RowOutcome::Skipped) => {
                    session.skipped += 1;
                    debug!(row = row.number, "Skipped duplicate row");
                }
                Err(e) => {
                    warn!(row = row.number, "Row failed: {e}");
                    let message = match &e {
                        ImportError::Row { .. } => e.to_string(),
                        other => format!("Row {}: {other}", row.number),
                    };
                    session.record_error(message);
                }
            }

            processed += 1;
            if processed % PROGRESS_EVERY == 0 {
                self.state
                    .update(BatchState::Processing, processed, total)
                    .await;
            }
            if config.throttle_pause_ms > 0 && processed % THROTTLE_EVERY == 0 {
                tokio::time::sleep(Duration::from_millis(config.throttle_pause_ms)).await;
            }
        }

        self.state
            .update(BatchState::Completed, processed, total)
            .await;
        Ok(processed)
    }

    /// One row, start to finish. Any error raised by any sub-step is caught
    /// at the row boundary by the caller.
    async fn process_row(
        &self,
        row: &Row,
        config: &ImportConfig,
        template: Option<&Template>,
        session: &mut ImportSession,
    ) -> ImportResult<RowOutcome> {
        let mapped = mapper::apply(row, &config.column_mapping);

        let title = mapped
            .title()
            .ok_or_else(|| ImportError::row(row.number, "no title value"))?
            .to_string();

        if config.skip_duplicates
            && dedup::exists(self.writer.store(), &title, &config.content_type).await?
        {
            return Ok(RowOutcome::Skipped);
        }

        // An explicit slug column seeds the slug, otherwise the title does
        let slug_source = mapped
            .get("post_slug")
            .or_else(|| mapped.get("slug"))
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(title.as_str())
            .to_string();
        let slug = slug::unique(self.writer.store(), session, &slug_source).await?;

        let record_id = self.writer.create(&mapped, config, &title, &slug).await?;

        if let Some(template) = template {
            self.writer
                .attach_template(record_id, template, config.builder, &mapped, &self.engine)
                .await?;
        }

        self.writer.write_meta(record_id, &mapped, config).await?;

        if config.attach_images {
            self.writer.attach_image(record_id, &mapped).await?;
        }

        Ok(RowOutcome::Created { record_id, title })
    }
}

fn check_required_columns(headers: &[String], required: &[String]) -> ImportResult<()> {
    let missing: Vec<&str> = required
        .iter()
        .filter(|column| !column.trim().is_empty())
        .filter(|column| !headers.iter().any(|header| header == *column))
        .map(|column| column.as_str())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ImportError::header(format!(
            "missing required columns: {}",
            missing.join(", ")
        )))
    }
}

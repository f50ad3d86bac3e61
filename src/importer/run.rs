//! The top-level import use case
//!
//! Sequences configuration loading and validation, source acquisition,
//! header checks and the batch loop for one invocation, and always produces
//! a structured report. Callers never see a raw error from here; pipeline
//! failures ride in the report together with their severity class. Run
//! cleanup (transient markers, the run guard) happens on every path.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::ConfigProvider;
use crate::database::settings::keys;
use crate::database::{ContentStore, SettingsStore};
use crate::errors::{ImportError, ImportResult, Severity};
use crate::importer::batch::BatchOrchestrator;
use crate::importer::state_manager::ImportStateManager;
use crate::importer::validator::ConfigValidator;
use crate::importer::writer::RecordWriter;
use crate::models::{BatchState, ImportConfig, ImportSession, RunReport, RunTrigger};
use crate::sources::CsvSource;

pub struct ImportRun {
    provider: Arc<dyn ConfigProvider>,
    source: Arc<CsvSource>,
    store: Arc<dyn ContentStore>,
    settings: SettingsStore,
    state: ImportStateManager,
}

impl ImportRun {
    pub fn new(
        provider: Arc<dyn ConfigProvider>,
        source: Arc<CsvSource>,
        store: Arc<dyn ContentStore>,
        settings: SettingsStore,
        state: ImportStateManager,
    ) -> Self {
        Self {
            provider,
            source,
            store,
            settings,
            state,
        }
    }

    /// Execute one import. The report's `success` is true exactly when no
    /// pipeline failure occurred and no row errored.
    pub async fn execute(&self, trigger: RunTrigger) -> RunReport {
        let config = match self.provider.import_config().await {
            Ok(config) => config,
            Err(e) => {
                error!(critical = e.is_critical(), "Import configuration unavailable: {e}");
                return RunReport::failure(format!("Import failed: {e}"), e.severity());
            }
        };

        let mut session = ImportSession::new(config.source.kind);

        // Single-flight: manual and scheduled entries both pass through here
        if !self.state.try_begin(&session.id, trigger).await {
            warn!("Rejecting {trigger} import, another import is already running");
            return RunReport::failure("An import is already running", Severity::Fatal);
        }

        info!(
            session = %session.id,
            "Starting {trigger} import from {} source {}",
            config.source.kind,
            config.source.location()
        );

        let report = self.run_pipeline(&config, &mut session).await;

        if report.success {
            info!(session = %session.id, "{}", report.message);
        } else {
            error!(
                session = %session.id,
                critical = matches!(report.failure, Some(Severity::Critical)),
                "{}",
                report.message
            );
        }

        self.cleanup(&report).await;
        report
    }

    async fn run_pipeline(&self, config: &ImportConfig, session: &mut ImportSession) -> RunReport {
        self.state.update(BatchState::Validating, 0, 0).await;
        let validation = ConfigValidator::new(self.source.clone()).validate(config).await;
        if !validation.complete {
            self.state.update(BatchState::Failed, 0, 0).await;
            return RunReport::failure(
                format!(
                    "Import failed: configuration invalid: {}",
                    validation.errors.join("; ")
                ),
                Severity::Critical,
            );
        }
        if !validation.valid {
            // An unreachable source is not a configuration problem; the load
            // step raises the outage as a fatal source error instead
            warn!(
                "Source readiness probe failed, attempting the import anyway: {}",
                validation.errors.join("; ")
            );
        }

        // Resource limits are advisory. The time ceiling is enforced around
        // the load and batch; there is no portable way to raise a memory
        // ceiling at runtime, so that one is only logged.
        if let Some(mb) = config.limits.memory_limit_mb {
            debug!("Memory limit of {mb} MB is advisory only");
        }

        let work = self.load_and_process(config, session);
        let outcome = match config.limits.time_limit_secs {
            Some(seconds) => match tokio::time::timeout(Duration::from_secs(seconds), work).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ImportError::Timeout { seconds }),
            },
            None => work.await,
        };

        match outcome {
            Ok((processed, total)) => {
                let success = session.errors == 0;
                let message = format!(
                    "Import completed: {} created, {} skipped, {} errors ({processed}/{total} rows)",
                    session.created, session.skipped, session.errors
                );
                RunReport {
                    success,
                    message,
                    processed,
                    total,
                    created: session.created,
                    skipped: session.skipped,
                    errors: session.errors,
                    error_messages: session.error_messages.clone(),
                    failure: None,
                }
            }
            Err(e) => {
                self.state.update(BatchState::Failed, 0, 0).await;
                RunReport::failure(format!("Import failed: {e}"), e.severity())
            }
        }
    }

    async fn load_and_process(
        &self,
        config: &ImportConfig,
        session: &mut ImportSession,
    ) -> ImportResult<(usize, usize)> {
        self.state.update(BatchState::Loading, 0, 0).await;
        let document = self.source.load(&config.source).await?;
        info!(
            "Loaded {} data rows, {} columns (delimiter {:?})",
            document.rows.len(),
            document.headers.len(),
            document.delimiter
        );

        // A title column may arrive directly or through the column mapping
        let has_title = document
            .headers
            .iter()
            .any(|h| h == "post_title" || h == "title")
            || config
                .column_mapping
                .values()
                .any(|target| target == "post_title" || target == "title");
        if !has_title {
            return Err(ImportError::header(
                "header has no post_title or title column",
            ));
        }

        // Transient run markers, cleared again by cleanup
        self.settings.set(keys::RUN_SESSION, &session.id).await?;
        self.settings.set(keys::RUN_HEADER, &document.headers).await?;

        let template = match config.template_id {
            Some(id) => Some(self.store.get_template(id).await?.ok_or_else(|| {
                ImportError::template(format!("template {id} does not exist"))
            })?),
            None => None,
        };

        let writer = RecordWriter::new(self.store.clone());
        let batch = BatchOrchestrator::new(writer, self.state.clone());
        let total = document.rows.len();
        let processed = batch
            .run(&document, config, template.as_ref(), session)
            .await?;

        Ok((processed, total))
    }

    /// Runs on every path once the guard is held
    async fn cleanup(&self, report: &RunReport) {
        if let Err(e) = self.settings.delete(keys::RUN_SESSION).await {
            warn!("Failed to clear run session marker: {e}");
        }
        if let Err(e) = self.settings.delete(keys::RUN_HEADER).await {
            warn!("Failed to clear run header marker: {e}");
        }
        self.state.finish(report).await;
    }
}

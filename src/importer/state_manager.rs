use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use crate::models::{BatchState, ImportEvent, RunReport, RunTrigger};

pub type EventSender = broadcast::Sender<ImportEvent>;
pub type EventReceiver = broadcast::Receiver<ImportEvent>;

/// Snapshot of the run currently in progress
#[derive(Debug, Clone)]
pub struct RunStatus {
    pub session_id: String,
    pub trigger: RunTrigger,
    pub state: BatchState,
    pub processed: usize,
    pub total: usize,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Owns the process-wide "an import is running" flag and fans out progress
/// events to subscribers. Both manual and scheduled entry points claim the
/// flag here, so at most one run is ever in progress.
#[derive(Clone)]
pub struct ImportStateManager {
    current: Arc<RwLock<Option<RunStatus>>>,
    events_tx: EventSender,
}

impl ImportStateManager {
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(1000);
        Self {
            current: Arc::new(RwLock::new(None)),
            events_tx,
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.events_tx.subscribe()
    }

    /// Claim the run guard. Returns false without side effects when another
    /// run is already active.
    pub async fn try_begin(&self, session_id: &str, trigger: RunTrigger) -> bool {
        let mut current = self.current.write().await;
        if current.is_some() {
            return false;
        }

        let now = Utc::now();
        *current = Some(RunStatus {
            session_id: session_id.to_string(),
            trigger,
            state: BatchState::Idle,
            processed: 0,
            total: 0,
            started_at: now,
            updated_at: now,
        });

        let _ = self.events_tx.send(ImportEvent::Started {
            session_id: session_id.to_string(),
        });
        true
    }

    pub async fn is_running(&self) -> bool {
        self.current.read().await.is_some()
    }

    pub async fn current(&self) -> Option<RunStatus> {
        self.current.read().await.clone()
    }

    /// Update the snapshot and broadcast a progress event
    pub async fn update(&self, state: BatchState, processed: usize, total: usize) {
        {
            let mut current = self.current.write().await;
            if let Some(status) = current.as_mut() {
                status.state = state;
                status.processed = processed;
                status.total = total;
                status.updated_at = Utc::now();
            }
        }

        let _ = self.events_tx.send(ImportEvent::Progress {
            processed,
            total,
            state,
        });
    }

    pub fn record_created(&self, record_id: i64, title: &str) {
        let _ = self.events_tx.send(ImportEvent::RecordCreated {
            record_id,
            title: title.to_string(),
        });
    }

    /// Release the run guard and broadcast the final event. Runs that failed
    /// at the pipeline level emit `Failed`; everything else, including
    /// degraded completions with row errors, emits `Completed`.
    pub async fn finish(&self, report: &RunReport) {
        {
            let mut current = self.current.write().await;
            *current = None;
        }

        if report.failure.is_some() {
            let _ = self.events_tx.send(ImportEvent::Failed {
                message: report.message.clone(),
            });
        } else {
            let _ = self.events_tx.send(ImportEvent::Completed(report.clone()));
        }
    }
}

impl Default for ImportStateManager {
    fn default() -> Self {
        Self::new()
    }
}

//! Shared state of a running job.
//!
//! Slice workers only touch the tracker at batch boundaries: to check
//! whether they should stop, and to checkpoint a finished batch. Every
//! checkpoint is persisted before the worker reads its next batch.

use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, watch};

use semvec_core::Result;

use crate::job::{JobStatus, RecordFailure, ReprocessJob};
use crate::store::JobStore;

/// Counts and position reached by one batch.
#[derive(Debug, Default)]
pub(crate) struct BatchOutcome {
    pub seen: u64,
    pub updated: u64,
    pub skipped: u64,
    pub failed: u64,
    pub failures: Vec<RecordFailure>,
    pub cursor: Option<String>,
    pub done: bool,
}

pub(crate) struct JobTracker {
    job: Mutex<ReprocessJob>,
    store: Arc<dyn JobStore>,
    stop: AtomicBool,
    sample_limit: usize,
    finished: watch::Sender<bool>,
}

impl JobTracker {
    pub fn new(job: ReprocessJob, store: Arc<dyn JobStore>, sample_limit: usize) -> Self {
        let (finished, _) = watch::channel(false);
        Self {
            stop: AtomicBool::new(job.cancel_requested),
            job: Mutex::new(job),
            store,
            sample_limit,
            finished,
        }
    }

    pub async fn snapshot(&self) -> ReprocessJob {
        self.job.lock().await.clone()
    }

    /// Whether workers should stop at their next batch boundary.
    pub fn should_stop(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Ask every worker to stop without marking the job cancelled.
    pub fn halt(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub async fn request_cancel(&self) -> Result<ReprocessJob> {
        self.halt();
        let mut job = self.job.lock().await;
        job.cancel_requested = true;
        job.updated_at = Utc::now();
        self.store.save(&job).await?;
        Ok(job.clone())
    }

    pub async fn set_status(
        &self,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<ReprocessJob> {
        let mut job = self.job.lock().await;
        job.status = status;
        if error.is_some() {
            job.error = error;
        }
        job.updated_at = Utc::now();
        self.store.save(&job).await?;
        Ok(job.clone())
    }

    pub async fn checkpoint(&self, slice_index: usize, outcome: BatchOutcome) -> Result<()> {
        let mut job = self.job.lock().await;
        if let Some(progress) = job.slices.get_mut(slice_index) {
            progress.seen += outcome.seen;
            progress.updated += outcome.updated;
            progress.skipped += outcome.skipped;
            progress.failed += outcome.failed;
            if outcome.cursor.is_some() {
                progress.cursor = outcome.cursor;
            }
            progress.done = outcome.done;
        }
        job.sample_failures(outcome.failures, self.sample_limit);
        job.updated_at = Utc::now();
        self.store.save(&job).await
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.finished.subscribe()
    }

    pub fn mark_finished(&self) {
        self.finished.send_replace(true);
    }
}

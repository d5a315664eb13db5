//! The bulk reprocessor: job submission, execution, and control.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use semvec_core::{Error, RecordFilter, Result};
use semvec_pipeline::{EmbeddingPipeline, PipelineDefinition, PipelineRegistry};
use semvec_storage::StorageEngine;

use crate::job::{JobId, JobStatus, ReprocessJob};
use crate::store::JobStore;
use crate::tracker::JobTracker;
use crate::worker::{Escalation, SliceExit, SliceWorker};

/// Reprocessing defaults and limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReprocessorConfig {
    /// Records per batch.
    pub batch_size: usize,
    /// Slices per job; 0 uses the available parallelism.
    pub slices: u32,
    /// Concurrent inference calls within one batch.
    pub inference_concurrency: usize,
    /// Job-wide cap on in-flight inference calls.
    pub max_inference_in_flight: Option<usize>,
    /// Consecutive unreachable-inference failures that fail a slice.
    pub systemic_failure_threshold: u32,
    /// Consecutive failed batch writes that fail a slice.
    pub max_consecutive_write_failures: u32,
    /// Failed records kept in a job's sample.
    pub failure_sample_limit: usize,
}

impl Default for ReprocessorConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            slices: 0,
            inference_concurrency: 1,
            max_inference_in_flight: None,
            systemic_failure_threshold: 50,
            max_consecutive_write_failures: 3,
            failure_sample_limit: 100,
        }
    }
}

impl ReprocessorConfig {
    /// Slice count after resolving `0` to the available parallelism.
    pub fn effective_slices(&self) -> u32 {
        if self.slices > 0 {
            return self.slices;
        }
        std::thread::available_parallelism()
            .map(|n| u32::try_from(n.get()).unwrap_or(u32::MAX))
            .unwrap_or(1)
    }

    fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::validation("batch size must be positive"));
        }
        if self.inference_concurrency == 0 {
            return Err(Error::validation("inference concurrency must be positive"));
        }
        if self.max_inference_in_flight == Some(0) {
            return Err(Error::validation("max inference in flight must be positive"));
        }
        if self.systemic_failure_threshold == 0 || self.max_consecutive_write_failures == 0 {
            return Err(Error::validation("escalation thresholds must be positive"));
        }
        Ok(())
    }
}

/// A request to reprocess one output field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Output field to regenerate.
    pub output_field: String,
    /// Records to select.
    #[serde(default)]
    pub filter: RecordFilter,
    /// Definition version; the active one when absent.
    #[serde(default)]
    pub version: Option<u64>,
    /// Records per batch; the configured default when absent.
    #[serde(default)]
    pub batch_size: Option<usize>,
    /// Slice count; the configured default when absent.
    #[serde(default)]
    pub slices: Option<u32>,
    /// Only records whose vector is missing or from another version.
    #[serde(default)]
    pub stale_only: bool,
}

impl JobRequest {
    /// Reprocess every record of `output_field` with the active definition.
    pub fn new(output_field: impl Into<String>) -> Self {
        Self {
            output_field: output_field.into(),
            filter: RecordFilter::All,
            version: None,
            batch_size: None,
            slices: None,
            stale_only: false,
        }
    }

    /// Set the filter.
    pub fn with_filter(mut self, filter: RecordFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Pin a definition version.
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    /// Set the batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    /// Set the slice count.
    pub fn with_slices(mut self, slices: u32) -> Self {
        self.slices = Some(slices);
        self
    }

    /// Restrict to stale records.
    pub fn stale_only(mut self) -> Self {
        self.stale_only = true;
        self
    }
}

struct Inner {
    storage: Arc<dyn StorageEngine>,
    registry: Arc<PipelineRegistry>,
    pipeline: EmbeddingPipeline,
    store: Arc<dyn JobStore>,
    config: ReprocessorConfig,
    running: Mutex<HashMap<JobId, Slot>>,
}

/// A job held by this reprocessor: reserved while a resume prepares it,
/// then running with a live tracker.
#[derive(Clone)]
enum Slot {
    Starting,
    Running(Arc<JobTracker>),
}

/// Runs reprocessing jobs.
///
/// Cloning is cheap; clones share running jobs.
#[derive(Clone)]
pub struct Reprocessor {
    inner: Arc<Inner>,
}

impl Reprocessor {
    /// Create a reprocessor.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] when `config` has a zero batch size, concurrency,
    /// or threshold.
    pub fn new(
        storage: Arc<dyn StorageEngine>,
        registry: Arc<PipelineRegistry>,
        pipeline: EmbeddingPipeline,
        store: Arc<dyn JobStore>,
        config: ReprocessorConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                storage,
                registry,
                pipeline,
                store,
                config,
                running: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// The configuration in effect.
    pub fn config(&self) -> &ReprocessorConfig {
        &self.inner.config
    }

    /// Validate `request`, persist a pending job, and start it in the background.
    pub async fn submit(&self, request: JobRequest) -> Result<ReprocessJob> {
        let config = &self.inner.config;
        let batch_size = request.batch_size.unwrap_or(config.batch_size);
        if batch_size == 0 {
            return Err(Error::validation("batch size must be positive"));
        }
        let slices = request.slices.unwrap_or_else(|| config.effective_slices());
        if slices == 0 {
            return Err(Error::validation("slice count must be positive"));
        }

        let definition = self
            .inner
            .registry
            .resolve(&request.output_field, request.version)
            .await?;
        let filter = if request.stale_only {
            request
                .filter
                .and(RecordFilter::stale(&definition.output_field, definition.version))
        } else {
            request.filter
        };

        let job = ReprocessJob::new(
            &definition.output_field,
            definition.version,
            filter,
            batch_size,
            slices,
        )?;
        self.inner.store.save(&job).await?;
        info!(
            "Submitted job {} for {} v{} ({} slices, batch {})",
            job.id, job.output_field, job.pipeline_version, slices, batch_size
        );
        self.start(job, definition).await
    }

    /// Submit and wait for the job to finish.
    pub async fn run(&self, request: JobRequest) -> Result<ReprocessJob> {
        let job = self.submit(request).await?;
        self.wait(&job.id).await
    }

    /// Current state of a job.
    pub async fn status(&self, id: &JobId) -> Result<ReprocessJob> {
        if let Some(tracker) = self.tracker(id).await {
            return Ok(tracker.snapshot().await);
        }
        self.load(id).await
    }

    /// Every job, oldest first, with live progress for running ones.
    pub async fn list(&self) -> Result<Vec<ReprocessJob>> {
        let mut jobs = self.inner.store.list().await?;
        let running = self.inner.running.lock().await.clone();
        for job in &mut jobs {
            if let Some(Slot::Running(tracker)) = running.get(&job.id) {
                *job = tracker.snapshot().await;
            }
        }
        Ok(jobs)
    }

    /// Request cancellation; workers stop at their next batch boundary.
    ///
    /// Cancelling a job that already finished returns it unchanged.
    pub async fn cancel(&self, id: &JobId) -> Result<ReprocessJob> {
        if let Some(tracker) = self.tracker(id).await {
            info!("Cancellation requested for job {}", id);
            return tracker.request_cancel().await;
        }

        let mut job = self.load(id).await?;
        if !job.status.is_terminal() {
            job.cancel_requested = true;
            job.status = JobStatus::Cancelled;
            job.updated_at = chrono::Utc::now();
            self.inner.store.save(&job).await?;
        }
        Ok(job)
    }

    /// Restart a failed, cancelled, or interrupted job from its checkpoints.
    ///
    /// Concurrent resumes of one job start it at most once; the others fail
    /// with [`Error::Validation`].
    pub async fn resume(&self, id: &JobId) -> Result<ReprocessJob> {
        match self.inner.running.lock().await.entry(*id) {
            Entry::Occupied(_) => {
                return Err(Error::validation(format!("job {id} is already running")));
            }
            Entry::Vacant(slot) => {
                slot.insert(Slot::Starting);
            }
        }
        let resumed = self.restart(id).await;
        if resumed.is_err() {
            self.inner.running.lock().await.remove(id);
        }
        resumed
    }

    async fn restart(&self, id: &JobId) -> Result<ReprocessJob> {
        let mut job = self.load(id).await?;
        if job.status == JobStatus::Completed {
            return Err(Error::validation(format!("job {id} already completed")));
        }

        let definition = self
            .inner
            .registry
            .get(&job.output_field, job.pipeline_version)
            .await?;
        job.status = JobStatus::Pending;
        job.cancel_requested = false;
        job.error = None;
        job.updated_at = chrono::Utc::now();
        self.inner.store.save(&job).await?;
        info!("Resuming job {}", job.id);
        self.start(job, definition).await
    }

    /// Wait until a job stops running and return its final state.
    pub async fn wait(&self, id: &JobId) -> Result<ReprocessJob> {
        if let Some(tracker) = self.tracker(id).await {
            let mut finished = tracker.subscribe();
            // The sender lives in the tracker, so the channel cannot close first.
            let _ = finished.wait_for(|done| *done).await;
        }
        self.load(id).await
    }

    /// Forget a job that is not running.
    pub async fn clear(&self, id: &JobId) -> Result<()> {
        if self.inner.running.lock().await.contains_key(id) {
            return Err(Error::validation(format!(
                "job {id} is running; cancel it before clearing"
            )));
        }
        if self.inner.store.delete(id).await? {
            info!("Cleared job {}", id);
            Ok(())
        } else {
            Err(Error::not_found(format!("job {id}")))
        }
    }

    async fn tracker(&self, id: &JobId) -> Option<Arc<JobTracker>> {
        match self.inner.running.lock().await.get(id) {
            Some(Slot::Running(tracker)) => Some(tracker.clone()),
            _ => None,
        }
    }

    async fn load(&self, id: &JobId) -> Result<ReprocessJob> {
        self.inner
            .store
            .load(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("job {id}")))
    }

    async fn start(
        &self,
        job: ReprocessJob,
        definition: PipelineDefinition,
    ) -> Result<ReprocessJob> {
        let id = job.id;
        let tracker = Arc::new(JobTracker::new(
            job,
            self.inner.store.clone(),
            self.inner.config.failure_sample_limit,
        ));
        let snapshot = tracker.set_status(JobStatus::Running, None).await?;
        self.inner
            .running
            .lock()
            .await
            .insert(id, Slot::Running(tracker.clone()));

        let inner = self.inner.clone();
        tokio::spawn(async move {
            execute(&inner, &tracker, Arc::new(definition)).await;
            inner.running.lock().await.remove(&id);
            tracker.mark_finished();
        });
        Ok(snapshot)
    }
}

async fn execute(inner: &Inner, tracker: &Arc<JobTracker>, definition: Arc<PipelineDefinition>) {
    let job = tracker.snapshot().await;
    let config = &inner.config;
    let permits = config
        .max_inference_in_flight
        .unwrap_or(job.slice_count as usize * config.inference_concurrency)
        .max(1);
    let limiter = Arc::new(Semaphore::new(permits));
    let escalation = Escalation {
        unreachable_records: config.systemic_failure_threshold,
        write_failures: config.max_consecutive_write_failures,
    };

    let mut workers = JoinSet::new();
    for (index, progress) in job.slices.iter().enumerate() {
        if progress.done {
            continue;
        }
        let worker = SliceWorker {
            index,
            slice: progress.slice,
            cursor: progress.cursor.clone(),
            filter: job.filter.clone(),
            batch_size: job.batch_size,
            inference_concurrency: config.inference_concurrency,
            escalation,
            definition: definition.clone(),
            pipeline: inner.pipeline.clone(),
            storage: inner.storage.clone(),
            limiter: limiter.clone(),
            tracker: tracker.clone(),
        };
        workers.spawn(worker.run());
    }

    let mut systemic: Option<String> = None;
    while let Some(joined) = workers.join_next().await {
        let exit =
            joined.unwrap_or_else(|e| SliceExit::Systemic(format!("slice task aborted: {e}")));
        if let SliceExit::Systemic(reason) = exit {
            error!("Job {} slice failed: {}", job.id, reason);
            tracker.halt();
            systemic.get_or_insert(reason);
        }
    }

    let finished = tracker.snapshot().await;
    let (status, error) = match systemic {
        Some(reason) => (JobStatus::Failed, Some(reason)),
        None if finished.all_slices_done() => (JobStatus::Completed, None),
        None if finished.cancel_requested => (JobStatus::Cancelled, None),
        None => (
            JobStatus::Failed,
            Some("slices stopped before reaching the end".to_string()),
        ),
    };

    match tracker.set_status(status, error).await {
        Ok(job) => {
            let totals = job.totals();
            info!(
                "Job {} {}: seen={} updated={} skipped={} failed={}",
                job.id, job.status, totals.seen, totals.updated, totals.skipped, totals.failed
            );
        }
        Err(e) => warn!("Job {} final status not persisted: {}", finished.id, e),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::MemoryJobStore;
    use semvec_core::{Record, RetryPolicy};
    use semvec_inference::{InferenceClient, InferenceClientConfig, MockInferenceService};
    use semvec_pipeline::PipelineSpec;
    use semvec_storage::MemoryStorageEngine;

    async fn setup(
        records: usize,
        config: ReprocessorConfig,
    ) -> (Reprocessor, Arc<MemoryStorageEngine>, Arc<PipelineRegistry>) {
        setup_with_store(records, config, Arc::new(MemoryJobStore::new())).await
    }

    async fn setup_with_store(
        records: usize,
        config: ReprocessorConfig,
        store: Arc<dyn JobStore>,
    ) -> (Reprocessor, Arc<MemoryStorageEngine>, Arc<PipelineRegistry>) {
        let storage = Arc::new(MemoryStorageEngine::new());
        for i in 0..records {
            let record =
                Record::new(format!("r{i}")).with_attribute("message", format!("text {i}"));
            storage.put_record(&record).await.unwrap();
        }
        let registry = Arc::new(PipelineRegistry::new());
        registry
            .register(PipelineSpec::new("vector", ["message"], 4))
            .await
            .unwrap();
        let client = InferenceClient::new(
            Arc::new(MockInferenceService::new()),
            InferenceClientConfig {
                retry: RetryPolicy::none(),
                ..Default::default()
            },
        );
        let reprocessor = Reprocessor::new(
            storage.clone(),
            registry.clone(),
            EmbeddingPipeline::new(Arc::new(client)),
            store,
            config,
        )
        .unwrap();
        (reprocessor, storage, registry)
    }

    #[tokio::test]
    async fn test_run_updates_every_record() {
        let (reprocessor, storage, _) = setup(50, ReprocessorConfig::default()).await;
        let job = reprocessor
            .run(JobRequest::new("vector").with_batch_size(7).with_slices(3))
            .await
            .unwrap();

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.totals().updated, 50);
        assert!(job.slices.iter().all(|s| s.done));
        assert!(
            storage
                .snapshot()
                .await
                .iter()
                .all(|r| r.vector("vector").is_some_and(|v| v.dimension() == 4))
        );
    }

    #[tokio::test]
    async fn test_stale_only_skips_current_records() {
        let (reprocessor, _, registry) = setup(20, ReprocessorConfig::default()).await;
        reprocessor
            .run(JobRequest::new("vector").with_slices(2))
            .await
            .unwrap();

        let again = reprocessor
            .run(JobRequest::new("vector").with_slices(2).stale_only())
            .await
            .unwrap();
        assert_eq!(again.totals().seen, 0);

        registry
            .register(PipelineSpec::new("vector", ["message", "level"], 4))
            .await
            .unwrap();
        let upgraded = reprocessor
            .run(JobRequest::new("vector").with_slices(2).stale_only())
            .await
            .unwrap();
        assert_eq!(upgraded.pipeline_version, 2);
        assert_eq!(upgraded.totals().updated, 20);
    }

    #[tokio::test]
    async fn test_submit_validation() {
        let (reprocessor, _, _) = setup(0, ReprocessorConfig::default()).await;
        assert!(matches!(
            reprocessor.submit(JobRequest::new("vector").with_batch_size(0)).await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            reprocessor.submit(JobRequest::new("vector").with_slices(0)).await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            reprocessor.submit(JobRequest::new("missing")).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            reprocessor.submit(JobRequest::new("vector").with_version(7)).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_collection_completes() {
        let (reprocessor, _, _) = setup(0, ReprocessorConfig::default()).await;
        let job = reprocessor
            .run(JobRequest::new("vector").with_slices(4))
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.totals().seen, 0);
    }

    #[tokio::test]
    async fn test_list_status_and_clear() {
        let (reprocessor, _, _) = setup(5, ReprocessorConfig::default()).await;
        let job = reprocessor
            .run(JobRequest::new("vector").with_slices(1))
            .await
            .unwrap();

        assert_eq!(reprocessor.status(&job.id).await.unwrap().status, JobStatus::Completed);
        assert_eq!(reprocessor.list().await.unwrap().len(), 1);
        assert_eq!(reprocessor.cancel(&job.id).await.unwrap().status, JobStatus::Completed);
        assert!(reprocessor.resume(&job.id).await.is_err());

        reprocessor.clear(&job.id).await.unwrap();
        assert!(matches!(
            reprocessor.status(&job.id).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            reprocessor.clear(&job.id).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_resumes_start_job_once() {
        let store = Arc::new(MemoryJobStore::new());
        let interrupted = ReprocessJob::new("vector", 1, RecordFilter::All, 10, 2).unwrap();
        store.save(&interrupted).await.unwrap();
        let (reprocessor, _, _) =
            setup_with_store(200, ReprocessorConfig::default(), store).await;

        let id = interrupted.id;
        let attempts: Vec<_> = (0..8)
            .map(|_| {
                let reprocessor = reprocessor.clone();
                tokio::spawn(async move { reprocessor.resume(&id).await })
            })
            .collect();

        let mut started = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(_) => started += 1,
                Err(e) => assert!(matches!(e, Error::Validation(_))),
            }
        }
        assert_eq!(started, 1);

        let finished = reprocessor.wait(&id).await.unwrap();
        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(finished.totals().seen, 200);
        assert_eq!(finished.totals().updated, 200);
    }

    #[tokio::test]
    async fn test_failed_resume_releases_reservation() {
        let (reprocessor, _, _) = setup(0, ReprocessorConfig::default()).await;
        let missing = JobId::new();
        assert!(matches!(
            reprocessor.resume(&missing).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            reprocessor.resume(&missing).await,
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_config_validation() {
        let mut config = ReprocessorConfig::default();
        assert!(config.validate().is_ok());
        config.systemic_failure_threshold = 0;
        assert!(config.validate().is_err());
        assert!(ReprocessorConfig::default().effective_slices() >= 1);
    }

    #[test]
    fn test_config_from_partial_json() {
        let config: ReprocessorConfig = serde_json::from_str(r#"{"batch_size": 500}"#).unwrap();
        assert_eq!(config.batch_size, 500);
        assert_eq!(config.systemic_failure_threshold, 50);
    }
}

//! Slice worker: reads one slice batch by batch and writes vectors back.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use semvec_core::{Error, FaultCategory, Record, RecordFilter, Result, StoredVector};
use semvec_pipeline::{EmbeddingPipeline, PipelineDefinition};
use semvec_storage::{ReadRequest, SliceSpec, StorageEngine, VectorUpdate};

use crate::job::RecordFailure;
use crate::tracker::{BatchOutcome, JobTracker};

/// How a slice worker stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SliceExit {
    /// Read to the end.
    Completed,
    /// Stopped at a batch boundary (cancel, or another slice failed).
    Stopped,
    /// Progress is impossible.
    Systemic(String),
}

/// Limits that turn repeated faults into a systemic failure.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Escalation {
    pub unreachable_records: u32,
    pub write_failures: u32,
}

pub(crate) struct SliceWorker {
    pub index: usize,
    pub slice: SliceSpec,
    pub cursor: Option<String>,
    pub filter: RecordFilter,
    pub batch_size: usize,
    pub inference_concurrency: usize,
    pub escalation: Escalation,
    pub definition: Arc<PipelineDefinition>,
    pub pipeline: EmbeddingPipeline,
    pub storage: Arc<dyn StorageEngine>,
    pub limiter: Arc<Semaphore>,
    pub tracker: Arc<JobTracker>,
}

enum Embedded {
    Vector(StoredVector),
    Skipped,
    Failed(Error),
}

impl SliceWorker {
    pub async fn run(mut self) -> SliceExit {
        info!(
            "Slice {} of {} v{} starting",
            self.slice, self.definition.output_field, self.definition.version
        );
        let mut unreachable_streak = 0u32;
        let mut write_failure_streak = 0u32;

        loop {
            if self.tracker.should_stop() {
                info!("Slice {} stopping at batch boundary", self.slice);
                return SliceExit::Stopped;
            }

            let request = ReadRequest::new(self.filter.clone(), self.batch_size)
                .with_slice(self.slice)
                .with_cursor(self.cursor.clone())
                .with_fields(self.definition.composition.clone());
            let page = match self.storage.read_batch(&request).await {
                Ok(page) => page,
                Err(e) => {
                    return SliceExit::Systemic(format!(
                        "slice {}: batch read failed: {e}",
                        self.slice
                    ));
                }
            };

            let mut outcome = BatchOutcome {
                seen: page.records.len() as u64,
                cursor: page.next_cursor.clone(),
                done: !page.has_more,
                ..Default::default()
            };

            let embedded = self.embed_batch(page.records).await;
            let mut updates = Vec::with_capacity(embedded.len());
            for (id, result) in embedded {
                match result {
                    Embedded::Vector(vector) => {
                        unreachable_streak = 0;
                        updates.push(VectorUpdate {
                            id,
                            field: self.definition.output_field.clone(),
                            vector,
                        });
                    }
                    Embedded::Skipped => {
                        unreachable_streak = 0;
                        outcome.skipped += 1;
                    }
                    Embedded::Failed(e) => {
                        if e.is_unreachable() {
                            unreachable_streak += 1;
                        } else {
                            unreachable_streak = 0;
                        }
                        warn!("Record {} failed: {}", id, e);
                        outcome.failed += 1;
                        outcome.failures.push(RecordFailure {
                            id,
                            category: e.category(),
                            reason: e.to_string(),
                        });
                        if unreachable_streak >= self.escalation.unreachable_records {
                            return SliceExit::Systemic(format!(
                                "slice {}: inference unreachable for {} consecutive records: {e}",
                                self.slice, unreachable_streak
                            ));
                        }
                    }
                }
            }

            if !updates.is_empty() {
                match self.storage.update_vectors(&updates).await {
                    Ok(outcomes) => {
                        write_failure_streak = 0;
                        for result in outcomes {
                            match result.error {
                                None => outcome.updated += 1,
                                Some(reason) => {
                                    warn!("Record {} not written: {}", result.id, reason);
                                    outcome.failed += 1;
                                    outcome.failures.push(RecordFailure {
                                        id: result.id,
                                        category: FaultCategory::Internal,
                                        reason,
                                    });
                                }
                            }
                        }
                    }
                    Err(e) => {
                        write_failure_streak += 1;
                        if write_failure_streak >= self.escalation.write_failures {
                            return SliceExit::Systemic(format!(
                                "slice {}: {} consecutive batch writes failed: {e}",
                                self.slice, write_failure_streak
                            ));
                        }
                        warn!("Slice {} batch write failed: {}", self.slice, e);
                        outcome.failed += updates.len() as u64;
                        let category = e.category();
                        outcome
                            .failures
                            .extend(updates.iter().map(|u| RecordFailure {
                                id: u.id.clone(),
                                category,
                                reason: e.to_string(),
                            }));
                    }
                }
            }

            debug!(
                "Slice {} batch: seen={} updated={} skipped={} failed={}",
                self.slice, outcome.seen, outcome.updated, outcome.skipped, outcome.failed
            );
            let done = outcome.done;
            if outcome.cursor.is_some() {
                self.cursor = outcome.cursor.clone();
            }
            if let Err(e) = self.tracker.checkpoint(self.index, outcome).await {
                return SliceExit::Systemic(format!("slice {}: checkpoint failed: {e}", self.slice));
            }
            if done {
                info!("Slice {} completed", self.slice);
                return SliceExit::Completed;
            }
        }
    }

    async fn embed_batch(&self, records: Vec<Record>) -> Vec<(String, Embedded)> {
        stream::iter(records)
            .map(|record| async move {
                let result = self.embed_one(&record).await;
                (record.id, result)
            })
            .buffered(self.inference_concurrency.max(1))
            .collect()
            .await
    }

    async fn embed_one(&self, record: &Record) -> Embedded {
        let result: Result<Option<StoredVector>> = async {
            let _permit = self
                .limiter
                .acquire()
                .await
                .map_err(|_| Error::systemic("inference limiter closed"))?;
            self.pipeline.embed_record(record, &self.definition).await
        }
        .await;
        match result {
            Ok(Some(vector)) => Embedded::Vector(vector),
            Ok(None) => Embedded::Skipped,
            Err(e) => Embedded::Failed(e),
        }
    }
}

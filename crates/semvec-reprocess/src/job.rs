//! Reprocessing job model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use semvec_core::{Error, FaultCategory, RecordFilter};
use semvec_storage::SliceSpec;

/// Unique job identifier (UUID v4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| Error::validation(format!("invalid job id '{s}': {e}")))
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted, not yet started.
    Pending,
    /// Slices are being processed.
    Running,
    /// Every slice finished. Individual records may still have failed.
    Completed,
    /// A systemic fault stopped the job; checkpoints are kept for resume.
    Failed,
    /// Stopped at a batch boundary on request.
    Cancelled,
}

impl JobStatus {
    /// Whether the job will not progress without a resume.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Progress of one slice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceProgress {
    /// Which slice.
    pub slice: SliceSpec,
    /// Records read.
    pub seen: u64,
    /// Records whose vector was written.
    pub updated: u64,
    /// Records skipped by the empty-text policy.
    pub skipped: u64,
    /// Records that failed this pass.
    pub failed: u64,
    /// Position after the last checkpointed batch.
    pub cursor: Option<String>,
    /// Whether the slice has been read to the end.
    pub done: bool,
}

impl SliceProgress {
    /// Fresh progress for `slice`.
    pub fn new(slice: SliceSpec) -> Self {
        Self {
            slice,
            seen: 0,
            updated: 0,
            skipped: 0,
            failed: 0,
            cursor: None,
            done: false,
        }
    }
}

/// A sampled record failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFailure {
    /// Record id.
    pub id: String,
    /// Fault category of the error.
    pub category: FaultCategory,
    /// Error message.
    pub reason: String,
}

/// Aggregate counts across slices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTotals {
    /// Records read.
    pub seen: u64,
    /// Records written.
    pub updated: u64,
    /// Records skipped.
    pub skipped: u64,
    /// Records failed.
    pub failed: u64,
}

/// A bulk reprocessing job and its persisted progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReprocessJob {
    /// Job id.
    pub id: JobId,
    /// Output field being regenerated.
    pub output_field: String,
    /// Definition version applied.
    pub pipeline_version: u64,
    /// Records selected.
    pub filter: RecordFilter,
    /// Records per batch.
    pub batch_size: usize,
    /// Number of slices.
    pub slice_count: u32,
    /// Lifecycle state.
    pub status: JobStatus,
    /// Per-slice progress, indexed by slice id.
    pub slices: Vec<SliceProgress>,
    /// Bounded sample of failed records.
    #[serde(default)]
    pub failures: Vec<RecordFailure>,
    /// Systemic error that failed the job.
    #[serde(default)]
    pub error: Option<String>,
    /// Set by cancel; observed at batch boundaries.
    #[serde(default)]
    pub cancel_requested: bool,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl ReprocessJob {
    /// A pending job over `slice_count` fresh slices.
    pub fn new(
        output_field: impl Into<String>,
        pipeline_version: u64,
        filter: RecordFilter,
        batch_size: usize,
        slice_count: u32,
    ) -> semvec_core::Result<Self> {
        let slices = SliceSpec::all(slice_count)?
            .into_iter()
            .map(SliceProgress::new)
            .collect();
        let now = Utc::now();
        Ok(Self {
            id: JobId::new(),
            output_field: output_field.into(),
            pipeline_version,
            filter,
            batch_size,
            slice_count,
            status: JobStatus::Pending,
            slices,
            failures: Vec::new(),
            error: None,
            cancel_requested: false,
            created_at: now,
            updated_at: now,
        })
    }

    /// Sum of per-slice counts.
    pub fn totals(&self) -> JobTotals {
        self.slices.iter().fold(JobTotals::default(), |acc, s| JobTotals {
            seen: acc.seen + s.seen,
            updated: acc.updated + s.updated,
            skipped: acc.skipped + s.skipped,
            failed: acc.failed + s.failed,
        })
    }

    /// Append failures, keeping at most `limit` samples.
    pub fn sample_failures(
        &mut self,
        failures: impl IntoIterator<Item = RecordFailure>,
        limit: usize,
    ) {
        let room = limit.saturating_sub(self.failures.len());
        self.failures.extend(failures.into_iter().take(room));
    }

    /// Whether every slice has been read to the end.
    pub fn all_slices_done(&self) -> bool {
        self.slices.iter().all(|s| s.done)
    }
}

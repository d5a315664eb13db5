//! Bulk reprocessing for semvec.
//!
//! A [`ReprocessJob`] applies one pipeline definition version to every
//! record matching a filter. The key space is split into deterministic
//! slices; each slice runs as its own task, reading fixed-size batches in
//! `(partition_key, id)` order, embedding them, and writing the vectors back
//! with partial updates. Progress is checkpointed to a [`JobStore`] after
//! every batch, so cancelled or failed jobs resume mid-slice.
//!
//! ```text
//! Reprocessor ── submit ──▶ ReprocessJob (pending → running)
//!     │                        │
//!     │              ┌─────────┼─────────┐
//!     │           slice 0   slice 1 … slice S-1     one task each
//!     │              │ read → compose → infer → normalize → write
//!     │              └──── checkpoint ───▶ JobStore (memory | redb)
//!     └── status / list / cancel / resume / wait / clear
//! ```
//!
//! Per-record failures are counted and sampled without stopping a slice.
//! Systemic faults (a batch read that keeps failing, inference unreachable
//! for many consecutive records, repeated batch write failures) fail the job.

mod job;
mod redb_store;
mod reprocessor;
mod store;
mod tracker;
mod worker;

pub use job::{JobId, JobStatus, JobTotals, RecordFailure, ReprocessJob, SliceProgress};
pub use redb_store::RedbJobStore;
pub use reprocessor::{JobRequest, Reprocessor, ReprocessorConfig};
pub use store::{JobStore, MemoryJobStore};

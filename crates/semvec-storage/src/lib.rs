//! Storage-engine seam for semvec.
//!
//! The storage engine persists records and runs nearest-neighbor queries.
//! This crate defines the [`StorageEngine`] trait the rest of semvec talks
//! to, the deterministic key-space slicing used by bulk reprocessing, and
//! three implementations:
//!
//! - [`MemoryStorageEngine`]: in-process, exact cosine scoring
//! - [`HttpStorageEngine`]: OpenSearch REST API
//! - [`RetryingStorage`]: timeout and backoff around any other engine

mod engine;
mod http;
mod memory;
mod retry;
mod slice;

pub use engine::{
    Cursor, NearestQuery, ReadRequest, RecordPage, ScoredRecord, Similarity, StorageEngine,
    UpdateOutcome, VectorFieldSchema, VectorUpdate,
};
pub use http::{HttpStorageEngine, filter_query, record_from_source, vector_mapping};
pub use memory::MemoryStorageEngine;
pub use retry::RetryingStorage;
pub use slice::{SliceSpec, partition_key};

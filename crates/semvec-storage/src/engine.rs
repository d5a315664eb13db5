//! The storage-engine trait and its request/response types.
//!
//! The storage engine is an external collaborator: it persists records,
//! enumerates them in a stable order, accepts partial vector updates, and
//! executes nearest-neighbor queries. semvec never implements approximate
//! search itself.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use semvec_core::{Error, Record, RecordFilter, Result, StoredVector};

use crate::slice::{SliceSpec, partition_key};

/// Vector similarity used by a declared field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Similarity {
    /// Cosine similarity.
    #[default]
    Cosine,
}

/// Schema of a dense vector field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorFieldSchema {
    /// Output field name.
    pub field: String,
    /// Fixed vector length.
    pub dimension: usize,
    /// Similarity function.
    #[serde(default)]
    pub similarity: Similarity,
    /// Engine-specific index options, passed through untouched.
    #[serde(default)]
    pub index_options: serde_json::Value,
}

impl VectorFieldSchema {
    /// Cosine schema with no index options.
    pub fn new(field: impl Into<String>, dimension: usize) -> Self {
        Self {
            field: field.into(),
            dimension,
            similarity: Similarity::Cosine,
            index_options: serde_json::Value::Null,
        }
    }
}

/// Position after the last record of a page.
///
/// Records are enumerated in `(partition_key, id)` order. The cursor is
/// exchanged as an opaque string so that callers can persist it verbatim.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Cursor {
    /// Partition key of the last record seen.
    pub partition: u32,
    /// Id of the last record seen.
    pub id: String,
}

impl Cursor {
    /// Cursor positioned after `id`.
    pub fn after(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            partition: partition_key(&id),
            id,
        }
    }

    /// Encode as an opaque string.
    pub fn encode(&self) -> String {
        serde_json::json!([self.partition, self.id]).to_string()
    }

    /// Decode a string produced by [`Cursor::encode`].
    pub fn decode(raw: &str) -> Result<Self> {
        let (partition, id): (u32, String) = serde_json::from_str(raw)
            .map_err(|e| Error::validation(format!("invalid cursor '{raw}': {e}")))?;
        Ok(Self { partition, id })
    }
}

/// One page request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadRequest {
    /// Records to select.
    #[serde(default)]
    pub filter: RecordFilter,
    /// Restrict to one slice of the key space.
    #[serde(default)]
    pub slice: Option<SliceSpec>,
    /// Resume after this position.
    #[serde(default)]
    pub cursor: Option<String>,
    /// Page size.
    pub limit: usize,
    /// Attributes to return; empty returns all. Vectors are never returned.
    #[serde(default)]
    pub fields: Vec<String>,
}

impl ReadRequest {
    /// Read everything matching `filter`, `limit` records at a time.
    pub fn new(filter: RecordFilter, limit: usize) -> Self {
        Self {
            filter,
            slice: None,
            cursor: None,
            limit,
            fields: Vec::new(),
        }
    }

    /// Restrict to a slice.
    pub fn with_slice(mut self, slice: SliceSpec) -> Self {
        self.slice = Some(slice);
        self
    }

    /// Continue from a cursor.
    pub fn with_cursor(mut self, cursor: Option<String>) -> Self {
        self.cursor = cursor;
        self
    }

    /// Project onto the given attributes.
    pub fn with_fields(mut self, fields: Vec<String>) -> Self {
        self.fields = fields;
        self
    }
}

/// A page of records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordPage {
    /// Records in `(partition_key, id)` order.
    pub records: Vec<Record>,
    /// Cursor after the last record, if the page was non-empty.
    pub next_cursor: Option<String>,
    /// Whether another page may follow.
    pub has_more: bool,
}

/// Partial update writing one vector field and its version marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorUpdate {
    /// Record id.
    pub id: String,
    /// Output field name.
    pub field: String,
    /// Vector and producing version.
    pub vector: StoredVector,
}

/// Per-record result of a bulk update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateOutcome {
    /// Record id.
    pub id: String,
    /// Rejection reason, if the record was not updated.
    pub error: Option<String>,
}

impl UpdateOutcome {
    /// Successful outcome.
    pub fn ok(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            error: None,
        }
    }

    /// Failed outcome.
    pub fn failed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            error: Some(reason.into()),
        }
    }

    /// Whether the record was written.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Nearest-neighbor query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearestQuery {
    /// Vector field to search.
    pub field: String,
    /// Query vector.
    pub vector: Vec<f32>,
    /// Results to return.
    pub k: usize,
    /// Candidate pool size (`>= k`).
    pub candidates: usize,
    /// Attributes to return; empty returns all.
    #[serde(default)]
    pub projection: Vec<String>,
}

/// One ranked hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredRecord {
    /// Record id.
    pub id: String,
    /// Engine similarity score; higher is closer.
    pub score: f32,
    /// Projected attributes.
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

/// A storage and nearest-neighbor search engine.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Declare (or confirm) a dense vector field.
    async fn declare_vector_field(&self, schema: &VectorFieldSchema) -> Result<()>;

    /// Insert or replace a record.
    async fn put_record(&self, record: &Record) -> Result<()>;

    /// Fetch a record with its vectors.
    async fn get_record(&self, id: &str) -> Result<Option<Record>>;

    /// Read one page in `(partition_key, id)` order.
    async fn read_batch(&self, request: &ReadRequest) -> Result<RecordPage>;

    /// Apply partial vector updates, reporting per-record outcomes.
    ///
    /// An `Err` means the whole request failed and nothing is known to have
    /// been written.
    async fn update_vectors(&self, updates: &[VectorUpdate]) -> Result<Vec<UpdateOutcome>>;

    /// Nearest neighbors of a vector, best first.
    async fn nearest(&self, query: &NearestQuery) -> Result<Vec<ScoredRecord>>;

    /// Number of records matching a filter.
    async fn count(&self, filter: &RecordFilter) -> Result<u64>;

    /// Engine name for logs.
    fn name(&self) -> &str;
}

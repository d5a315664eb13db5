//! In-process storage engine.
//!
//! Keeps records in a `BTreeMap` keyed by `(partition_key, id)`, which is
//! exactly the enumeration order the trait requires, and answers nearest
//! queries with an exact cosine scan. Read and write failures can be injected
//! to exercise the reprocessor's escalation paths.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;

use semvec_core::{Error, Record, RecordFilter, Result};

use crate::engine::{
    Cursor, NearestQuery, ReadRequest, RecordPage, ScoredRecord, StorageEngine, UpdateOutcome,
    VectorFieldSchema, VectorUpdate,
};
use crate::slice::partition_key;

type Key = (u32, String);

/// Storage engine backed by process memory.
#[derive(Default)]
pub struct MemoryStorageEngine {
    records: RwLock<BTreeMap<Key, Record>>,
    schemas: RwLock<HashMap<String, VectorFieldSchema>>,
    calls: AtomicU64,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryStorageEngine {
    /// Create an empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of trait calls served so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Make every `read_batch` fail as unavailable.
    pub fn set_read_failure(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every `update_vectors` fail as unavailable.
    pub fn set_write_failure(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether no records are stored.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Copy of every stored record, in enumeration order.
    pub async fn snapshot(&self) -> Vec<Record> {
        self.records.read().await.values().cloned().collect()
    }

    /// Declared dimension of a field, if any.
    pub async fn dimension(&self, field: &str) -> Option<usize> {
        self.schemas.read().await.get(field).map(|s| s.dimension)
    }

    fn touch(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

#[async_trait]
impl StorageEngine for MemoryStorageEngine {
    async fn declare_vector_field(&self, schema: &VectorFieldSchema) -> Result<()> {
        self.touch();
        if schema.dimension == 0 {
            return Err(Error::validation("vector dimension must be positive"));
        }
        let mut schemas = self.schemas.write().await;
        if let Some(existing) = schemas.get(&schema.field) {
            if existing.dimension != schema.dimension {
                return Err(Error::DimensionMismatch {
                    field: schema.field.clone(),
                    expected: existing.dimension,
                    actual: schema.dimension,
                });
            }
        }
        schemas.insert(schema.field.clone(), schema.clone());
        Ok(())
    }

    async fn put_record(&self, record: &Record) -> Result<()> {
        self.touch();
        if record.id.is_empty() {
            return Err(Error::validation("record id must not be empty"));
        }
        let schemas = self.schemas.read().await;
        for (field, vector) in &record.vectors {
            if let Some(schema) = schemas.get(field) {
                if schema.dimension != vector.dimension() {
                    return Err(Error::DimensionMismatch {
                        field: field.clone(),
                        expected: schema.dimension,
                        actual: vector.dimension(),
                    });
                }
            }
        }
        drop(schemas);

        let key = (partition_key(&record.id), record.id.clone());
        self.records.write().await.insert(key, record.clone());
        Ok(())
    }

    async fn get_record(&self, id: &str) -> Result<Option<Record>> {
        self.touch();
        let key = (partition_key(id), id.to_string());
        Ok(self.records.read().await.get(&key).cloned())
    }

    async fn read_batch(&self, request: &ReadRequest) -> Result<RecordPage> {
        self.touch();
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::unavailable("storage", "injected read failure"));
        }
        if request.limit == 0 {
            return Err(Error::validation("read limit must be positive"));
        }

        let lower = match &request.cursor {
            Some(raw) => {
                let cursor = Cursor::decode(raw)?;
                Bound::Excluded((cursor.partition, cursor.id))
            }
            None => match &request.slice {
                Some(slice) => Bound::Included((
                    u32::try_from(slice.start()).unwrap_or(u32::MAX),
                    String::new(),
                )),
                None => Bound::Unbounded,
            },
        };

        let records = self.records.read().await;
        let mut page = Vec::with_capacity(request.limit);
        let mut has_more = false;
        for ((partition, _), record) in records.range((lower, Bound::Unbounded)) {
            if let Some(slice) = &request.slice {
                if u64::from(*partition) >= slice.end() {
                    break;
                }
                if !slice.contains(*partition) {
                    continue;
                }
            }
            if !request.filter.matches(record) {
                continue;
            }
            if page.len() == request.limit {
                has_more = true;
                break;
            }
            page.push(Record {
                id: record.id.clone(),
                attributes: record.project(&request.fields),
                vectors: BTreeMap::new(),
            });
        }

        let next_cursor = page.last().map(|r| Cursor::after(r.id.clone()).encode());
        Ok(RecordPage {
            records: page,
            next_cursor,
            has_more,
        })
    }

    async fn update_vectors(&self, updates: &[VectorUpdate]) -> Result<Vec<UpdateOutcome>> {
        self.touch();
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::unavailable("storage", "injected write failure"));
        }

        let schemas = self.schemas.read().await;
        let mut records = self.records.write().await;
        let outcomes = updates
            .iter()
            .map(|update| {
                if let Some(schema) = schemas.get(&update.field) {
                    if schema.dimension != update.vector.dimension() {
                        return UpdateOutcome::failed(
                            &update.id,
                            format!(
                                "dimension {} does not match field dimension {}",
                                update.vector.dimension(),
                                schema.dimension
                            ),
                        );
                    }
                }
                let key = (partition_key(&update.id), update.id.clone());
                match records.get_mut(&key) {
                    Some(record) => {
                        record
                            .vectors
                            .insert(update.field.clone(), update.vector.clone());
                        UpdateOutcome::ok(&update.id)
                    }
                    None => UpdateOutcome::failed(&update.id, "record not found"),
                }
            })
            .collect();
        Ok(outcomes)
    }

    async fn nearest(&self, query: &NearestQuery) -> Result<Vec<ScoredRecord>> {
        self.touch();
        if let Some(dimension) = self.dimension(&query.field).await {
            if dimension != query.vector.len() {
                return Err(Error::DimensionMismatch {
                    field: query.field.clone(),
                    expected: dimension,
                    actual: query.vector.len(),
                });
            }
        }

        let records = self.records.read().await;
        let mut hits: Vec<ScoredRecord> = records
            .values()
            .filter_map(|record| {
                let stored = record.vector(&query.field)?;
                if stored.dimension() != query.vector.len() {
                    return None;
                }
                Some(ScoredRecord {
                    id: record.id.clone(),
                    score: cosine(&query.vector, &stored.values),
                    fields: record.project(&query.projection),
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(query.k);
        Ok(hits)
    }

    async fn count(&self, filter: &RecordFilter) -> Result<u64> {
        self.touch();
        let records = self.records.read().await;
        Ok(records.values().filter(|r| filter.matches(r)).count() as u64)
    }

    fn name(&self) -> &str {
        "memory"
    }
}

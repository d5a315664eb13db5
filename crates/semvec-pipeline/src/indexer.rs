//! Automatic vector generation for newly arriving records.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use semvec_core::{Record, Result};
use semvec_storage::StorageEngine;

use crate::registry::PipelineRegistry;
use crate::transform::EmbeddingPipeline;

/// What happened to one output field during ingest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FieldOutcome {
    /// A vector was written.
    Written {
        /// Output field.
        field: String,
        /// Producing version.
        version: u64,
    },
    /// The empty-text policy skipped the field.
    Skipped {
        /// Output field.
        field: String,
    },
    /// No vector; the record is stale for this field until reprocessed.
    Failed {
        /// Output field.
        field: String,
        /// Why inference failed.
        error: String,
    },
}

/// Result of indexing one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexReport {
    /// Record id.
    pub id: String,
    /// One entry per attached output field.
    pub fields: Vec<FieldOutcome>,
}

/// Embeds records for every attached output field, then stores them.
pub struct Indexer {
    registry: Arc<PipelineRegistry>,
    pipeline: EmbeddingPipeline,
    storage: Arc<dyn StorageEngine>,
    fields: Vec<String>,
}

impl Indexer {
    /// Create an indexer attached to `fields`.
    pub fn new(
        registry: Arc<PipelineRegistry>,
        pipeline: EmbeddingPipeline,
        storage: Arc<dyn StorageEngine>,
        fields: Vec<String>,
    ) -> Self {
        Self {
            registry,
            pipeline,
            storage,
            fields,
        }
    }

    /// Output fields this indexer maintains.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Embed and store one record.
    ///
    /// The record is always stored. A field whose inference fails is left
    /// without a vector and reported; the stale-vector filter picks it up on
    /// the next reprocessing pass.
    ///
    /// # Errors
    ///
    /// Fails before writing if an attached field has no active definition,
    /// or when the storage write itself fails.
    pub async fn index(&self, mut record: Record) -> Result<IndexReport> {
        let mut definitions = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            definitions.push(self.registry.current(field).await?);
        }

        let mut outcomes = Vec::with_capacity(definitions.len());
        for definition in &definitions {
            let field = definition.output_field.clone();
            record.vectors.remove(&field);
            match self.pipeline.embed_record(&record, definition).await {
                Ok(Some(vector)) => {
                    record.vectors.insert(field.clone(), vector);
                    outcomes.push(FieldOutcome::Written {
                        field,
                        version: definition.version,
                    });
                }
                Ok(None) => outcomes.push(FieldOutcome::Skipped { field }),
                Err(e) => {
                    warn!("Record {} has no '{}' vector: {}", record.id, field, e);
                    outcomes.push(FieldOutcome::Failed {
                        field,
                        error: e.to_string(),
                    });
                }
            }
        }

        self.storage.put_record(&record).await?;
        debug!("Indexed record {} ({} fields)", record.id, outcomes.len());
        Ok(IndexReport {
            id: record.id,
            fields: outcomes,
        })
    }
}

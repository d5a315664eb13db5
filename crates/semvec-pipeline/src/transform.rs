//! The compose → infer → normalize transform shared by indexing, bulk
//! reprocessing, and query embedding.

use std::sync::Arc;

use semvec_core::{Record, Result, StoredVector};
use semvec_inference::{InferenceClient, InferenceOutcome};

use crate::composer::compose;
use crate::definition::PipelineDefinition;
use crate::normalizer::normalize;

/// Runs a definition against records or raw text.
#[derive(Clone)]
pub struct EmbeddingPipeline {
    client: Arc<InferenceClient>,
}

impl EmbeddingPipeline {
    /// Create a pipeline over an inference client.
    pub fn new(client: Arc<InferenceClient>) -> Self {
        Self { client }
    }

    /// The underlying inference client.
    pub fn client(&self) -> &InferenceClient {
        &self.client
    }

    /// Vector for already composed `text`.
    ///
    /// Returns `Ok(None)` when the empty-text policy skips the record.
    pub async fn embed_text(
        &self,
        record_id: &str,
        text: &str,
        definition: &PipelineDefinition,
    ) -> Result<Option<StoredVector>> {
        match self.client.infer(record_id, text).await? {
            InferenceOutcome::Terms(map) => Ok(Some(StoredVector::new(
                normalize(&map, definition.dimension),
                definition.version,
            ))),
            InferenceOutcome::Skipped => Ok(None),
        }
    }

    /// Vector for `record` under `definition`.
    pub async fn embed_record(
        &self,
        record: &Record,
        definition: &PipelineDefinition,
    ) -> Result<Option<StoredVector>> {
        let text = compose(record, definition);
        self.embed_text(&record.id, &text, definition).await
    }
}

//! Query embedding and nearest-neighbor delegation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use semvec_core::{Error, Result};
use semvec_pipeline::{EmbeddingPipeline, PipelineRegistry, compose_attributes};
use semvec_storage::{NearestQuery, StorageEngine};

/// What to search with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchQuery {
    /// Free text, embedded like a composed record.
    Text(String),
    /// Attributes, composed with the field's definition first.
    Attributes(BTreeMap<String, String>),
    /// A vector of the field's dimension.
    Vector(Vec<f32>),
}

/// A search request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Vector field to search.
    pub output_field: String,
    /// Query.
    pub query: SearchQuery,
    /// Results to return.
    pub k: usize,
    /// Candidate pool; defaults to `max(k, default_candidates)`.
    #[serde(default)]
    pub candidates: Option<usize>,
    /// Attributes to return with each hit; empty returns all.
    #[serde(default)]
    pub fields: Vec<String>,
    /// Definition version used to embed the query; the active one when absent.
    #[serde(default)]
    pub version: Option<u64>,
}

impl SearchRequest {
    /// A text query for the top `k` hits.
    pub fn text(output_field: impl Into<String>, text: impl Into<String>, k: usize) -> Self {
        Self::new(output_field, SearchQuery::Text(text.into()), k)
    }

    /// A vector query for the top `k` hits.
    pub fn vector(output_field: impl Into<String>, vector: Vec<f32>, k: usize) -> Self {
        Self::new(output_field, SearchQuery::Vector(vector), k)
    }

    fn new(output_field: impl Into<String>, query: SearchQuery, k: usize) -> Self {
        Self {
            output_field: output_field.into(),
            query,
            k,
            candidates: None,
            fields: Vec::new(),
            version: None,
        }
    }
}

/// One ranked result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Record id.
    pub id: String,
    /// Similarity score.
    pub score: f32,
    /// Projected attributes.
    pub fields: BTreeMap<String, String>,
}

/// Ranked results and the definition version that embedded the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    /// Vector field searched.
    pub output_field: String,
    /// Definition version used.
    pub pipeline_version: u64,
    /// Hits with non-increasing scores.
    pub hits: Vec<SearchHit>,
}

/// Turns queries into vectors and delegates scoring to the storage engine.
pub struct SearchGateway {
    registry: Arc<PipelineRegistry>,
    pipeline: EmbeddingPipeline,
    storage: Arc<dyn StorageEngine>,
    default_candidates: usize,
}

impl SearchGateway {
    /// Create a gateway.
    pub fn new(
        registry: Arc<PipelineRegistry>,
        pipeline: EmbeddingPipeline,
        storage: Arc<dyn StorageEngine>,
        default_candidates: usize,
    ) -> Self {
        Self {
            registry,
            pipeline,
            storage,
            default_candidates,
        }
    }

    /// Run a search.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] for `k == 0`, a candidate pool below `k`, or
    ///   blank query text
    /// - [`Error::DimensionMismatch`] for a vector of the wrong length,
    ///   raised before the storage engine is called
    /// - [`Error::NotFound`] when the field or pinned version is unknown
    pub async fn search(&self, request: SearchRequest) -> Result<SearchResponse> {
        if request.k == 0 {
            return Err(Error::validation("k must be positive"));
        }
        let candidates = request
            .candidates
            .unwrap_or_else(|| request.k.max(self.default_candidates));
        if candidates < request.k {
            return Err(Error::validation(format!(
                "candidate pool {candidates} is smaller than k {}",
                request.k
            )));
        }

        let definition = self
            .registry
            .resolve(&request.output_field, request.version)
            .await?;

        let text = match request.query {
            SearchQuery::Vector(vector) => {
                if vector.len() != definition.dimension {
                    return Err(Error::DimensionMismatch {
                        field: definition.output_field,
                        expected: definition.dimension,
                        actual: vector.len(),
                    });
                }
                return self
                    .nearest(
                        definition.output_field,
                        definition.version,
                        vector,
                        &request.fields,
                        request.k,
                        candidates,
                    )
                    .await;
            }
            SearchQuery::Text(text) => text,
            SearchQuery::Attributes(attributes) => {
                compose_attributes(&attributes, &definition.composition)
            }
        };
        if text.trim().is_empty() {
            return Err(Error::validation("query text is empty"));
        }

        let vector = self
            .pipeline
            .embed_text("query", &text, &definition)
            .await?
            .ok_or_else(|| Error::validation("query text produced no vector"))?;
        self.nearest(
            definition.output_field,
            definition.version,
            vector.values,
            &request.fields,
            request.k,
            candidates,
        )
        .await
    }

    async fn nearest(
        &self,
        output_field: String,
        pipeline_version: u64,
        vector: Vec<f32>,
        fields: &[String],
        k: usize,
        candidates: usize,
    ) -> Result<SearchResponse> {
        let query = NearestQuery {
            field: output_field,
            vector,
            k,
            candidates,
            projection: fields.to_vec(),
        };
        let mut hits: Vec<SearchHit> = self
            .storage
            .nearest(&query)
            .await?
            .into_iter()
            .map(|hit| SearchHit {
                id: hit.id,
                score: hit.score,
                fields: hit.fields,
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(k);

        debug!(
            "Search on {} v{} returned {} hits",
            query.field,
            pipeline_version,
            hits.len()
        );
        Ok(SearchResponse {
            output_field: query.field,
            pipeline_version,
            hits,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use semvec_core::Record;
    use semvec_inference::{InferenceClient, InferenceClientConfig, MockInferenceService};
    use semvec_pipeline::PipelineSpec;
    use semvec_storage::MemoryStorageEngine;

    const DIMENSION: usize = 4;

    async fn setup() -> (SearchGateway, Arc<MemoryStorageEngine>, Arc<PipelineRegistry>) {
        let registry = Arc::new(PipelineRegistry::new());
        registry
            .register(PipelineSpec::new("vector", ["message"], DIMENSION))
            .await
            .unwrap();
        let client = InferenceClient::new(
            Arc::new(MockInferenceService::new()),
            InferenceClientConfig::default(),
        );
        let pipeline = EmbeddingPipeline::new(Arc::new(client));
        let storage = Arc::new(MemoryStorageEngine::new());

        let definition = registry.current("vector").await.unwrap();
        for (id, message) in [
            ("a", "enrich start"),
            ("b", "payment failed"),
            ("c", "enrich done"),
        ] {
            let record = Record::new(id).with_attribute("message", message);
            let vector = pipeline
                .embed_record(&record, &definition)
                .await
                .unwrap()
                .unwrap();
            storage
                .put_record(&record.with_vector("vector", vector))
                .await
                .unwrap();
        }

        let gateway = SearchGateway::new(registry.clone(), pipeline, storage.clone(), 100);
        (gateway, storage, registry)
    }

    #[tokio::test]
    async fn test_text_search_ranks_exact_match_first() {
        let (gateway, _, _) = setup().await;
        let response = gateway
            .search(SearchRequest::text("vector", "enrich start", 3))
            .await
            .unwrap();

        assert_eq!(response.pipeline_version, 1);
        assert_eq!(response.hits.len(), 3);
        assert_eq!(response.hits[0].id, "a");
        assert!((response.hits[0].score - 1.0).abs() < 1e-5);
        assert!(response.hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn test_attribute_search_composes_first() {
        let (gateway, _, _) = setup().await;
        let attributes = BTreeMap::from([("message".to_string(), "payment failed".to_string())]);
        let request = SearchRequest {
            fields: vec!["message".into()],
            ..SearchRequest::new("vector", SearchQuery::Attributes(attributes), 1)
        };
        let response = gateway.search(request).await.unwrap();
        assert_eq!(response.hits.len(), 1);
        assert_eq!(response.hits[0].id, "b");
        assert_eq!(
            response.hits[0].fields.get("message").map(String::as_str),
            Some("payment failed")
        );
    }

    #[tokio::test]
    async fn test_wrong_dimension_rejected_without_storage_call() {
        let (gateway, storage, _) = setup().await;
        let before = storage.calls();

        let err = gateway
            .search(SearchRequest::vector("vector", vec![0.1; DIMENSION + 1], 2))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected: DIMENSION,
                actual: 5,
                ..
            }
        ));
        assert_eq!(err.category(), semvec_core::FaultCategory::Validation);
        assert_eq!(storage.calls(), before);
    }

    #[tokio::test]
    async fn test_vector_search() {
        let (gateway, storage, _) = setup().await;
        let stored = storage.get_record("c").await.unwrap().unwrap();
        let vector = stored.vector("vector").unwrap().values.clone();

        let response = gateway
            .search(SearchRequest::vector("vector", vector, 1))
            .await
            .unwrap();
        assert_eq!(response.hits[0].id, "c");
    }

    #[tokio::test]
    async fn test_k_and_candidate_validation() {
        let (gateway, _, _) = setup().await;
        assert!(matches!(
            gateway.search(SearchRequest::text("vector", "x", 0)).await,
            Err(Error::Validation(_))
        ));

        let request = SearchRequest {
            candidates: Some(2),
            ..SearchRequest::text("vector", "x", 3)
        };
        assert!(matches!(gateway.search(request).await, Err(Error::Validation(_))));

        assert!(matches!(
            gateway.search(SearchRequest::text("vector", "  ", 3)).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_pinned_version() {
        let (gateway, _, registry) = setup().await;
        registry
            .register(PipelineSpec::new("vector", ["message", "level"], DIMENSION))
            .await
            .unwrap();

        let request = SearchRequest {
            version: Some(1),
            ..SearchRequest::text("vector", "enrich", 2)
        };
        assert_eq!(gateway.search(request).await.unwrap().pipeline_version, 1);

        let request = SearchRequest {
            version: Some(9),
            ..SearchRequest::text("vector", "enrich", 2)
        };
        assert!(matches!(gateway.search(request).await, Err(Error::NotFound(_))));

        let current = gateway
            .search(SearchRequest::text("vector", "enrich", 2))
            .await
            .unwrap();
        assert_eq!(current.pipeline_version, 2);
    }

    #[test]
    fn test_request_json_shape() {
        let request: SearchRequest = serde_json::from_str(
            r#"{"output_field":"vector","query":{"text":"enrich start"},"k":5}"#,
        )
        .unwrap();
        assert_eq!(request.query, SearchQuery::Text("enrich start".into()));
        assert!(request.candidates.is_none());
    }
}

//! HTTP API for semvec.
//!
//! Exposes pipeline registration, reprocessing jobs, search, and automatic
//! ingest over a single axum [`Router`]. Errors are returned as
//! `{ "error": "...", "category": "..." }` with a status derived from the
//! error's fault category (see [`error::status_for`]).
//!
//! | Method | Path | Operation |
//! |--------|------|-----------|
//! | GET | `/healthz` | liveness |
//! | POST, GET | `/pipelines` | register, list fields |
//! | GET | `/pipelines/{field}` | active definition |
//! | GET | `/pipelines/{field}/versions` | every version |
//! | POST | `/pipelines/{field}/activate` | switch active version |
//! | POST, GET | `/jobs` | submit, list |
//! | GET, DELETE | `/jobs/{id}` | status, clear |
//! | POST | `/jobs/{id}/cancel` | cancel |
//! | POST | `/jobs/{id}/resume` | resume |
//! | POST | `/search` | search |
//! | POST | `/records` | ingest one record |

pub mod error;
mod handlers;

use axum::Router;
use axum::routing::{get, post};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use semvec_core::Result;
use semvec_pipeline::{Indexer, PipelineRegistry};
use semvec_reprocess::Reprocessor;
use semvec_search::SearchGateway;
use semvec_storage::StorageEngine;

pub use error::{ApiError, ApiResult};
pub use handlers::{ActivateBody, SubmitBody};

/// Services shared by every handler.
#[derive(Clone)]
pub struct ApiState {
    registry: Arc<PipelineRegistry>,
    reprocessor: Reprocessor,
    gateway: Arc<SearchGateway>,
    indexer: Arc<Indexer>,
    storage: Arc<dyn StorageEngine>,
}

impl ApiState {
    /// Bundle the services behind the API.
    ///
    /// `storage` is used to declare a vector field whenever a definition for
    /// it is registered.
    pub fn new(
        registry: Arc<PipelineRegistry>,
        reprocessor: Reprocessor,
        gateway: Arc<SearchGateway>,
        indexer: Arc<Indexer>,
        storage: Arc<dyn StorageEngine>,
    ) -> Self {
        Self {
            registry,
            reprocessor,
            gateway,
            indexer,
            storage,
        }
    }
}

/// Build the router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route(
            "/pipelines",
            post(handlers::register_pipeline).get(handlers::list_pipelines),
        )
        .route("/pipelines/{field}", get(handlers::current_pipeline))
        .route(
            "/pipelines/{field}/versions",
            get(handlers::pipeline_versions),
        )
        .route(
            "/pipelines/{field}/activate",
            post(handlers::activate_pipeline),
        )
        .route("/jobs", post(handlers::submit_job).get(handlers::list_jobs))
        .route(
            "/jobs/{id}",
            get(handlers::job_status).delete(handlers::clear_job),
        )
        .route("/jobs/{id}/cancel", post(handlers::cancel_job))
        .route("/jobs/{id}/resume", post(handlers::resume_job))
        .route("/search", post(handlers::search))
        .route("/records", post(handlers::ingest_record))
        .with_state(state)
}

/// Serve the API on `addr` until `shutdown` resolves.
pub async fn serve<F>(state: ApiState, addr: SocketAddr, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("semvec API listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("semvec API stopped");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use semvec_inference::{InferenceClient, InferenceClientConfig, MockInferenceService};
    use semvec_pipeline::EmbeddingPipeline;
    use semvec_reprocess::{MemoryJobStore, ReprocessorConfig};
    use semvec_storage::MemoryStorageEngine;

    fn app() -> Router {
        let registry = Arc::new(PipelineRegistry::new());
        let client = InferenceClient::new(
            Arc::new(MockInferenceService::new()),
            InferenceClientConfig::default(),
        );
        let pipeline = EmbeddingPipeline::new(Arc::new(client));
        let storage: Arc<dyn StorageEngine> = Arc::new(MemoryStorageEngine::new());
        let config = ReprocessorConfig {
            batch_size: 10,
            slices: 2,
            ..Default::default()
        };
        let reprocessor = Reprocessor::new(
            storage.clone(),
            registry.clone(),
            pipeline.clone(),
            Arc::new(MemoryJobStore::new()),
            config,
        )
        .unwrap();
        let gateway = Arc::new(SearchGateway::new(
            registry.clone(),
            pipeline.clone(),
            storage.clone(),
            100,
        ));
        let indexer = Arc::new(Indexer::new(
            registry.clone(),
            pipeline,
            storage.clone(),
            vec!["vector".into()],
        ));
        router(ApiState::new(registry, reprocessor, gateway, indexer, storage))
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        let request = match body {
            Some(body) => request.body(Body::from(body.to_string())).unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn register(app: &Router, composition: &[&str]) -> Value {
        let (status, body) = send(
            app,
            "POST",
            "/pipelines",
            Some(json!({
                "output_field": "vector",
                "composition": composition,
                "dimension": 8,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body
    }

    #[tokio::test]
    async fn test_healthz() {
        let (status, body) = send(&app(), "GET", "/healthz", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_pipeline_lifecycle() {
        let app = app();
        assert_eq!(register(&app, &["message"]).await["version"], 1);
        assert_eq!(register(&app, &["message", "level"]).await["version"], 2);

        let (status, body) = send(&app, "GET", "/pipelines/vector", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["version"], 2);

        let (status, body) = send(
            &app,
            "POST",
            "/pipelines/vector/activate",
            Some(json!({ "version": 1 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["version"], 1);

        let (_, versions) = send(&app, "GET", "/pipelines/vector/versions", None).await;
        assert_eq!(versions.as_array().unwrap().len(), 2);

        let (_, fields) = send(&app, "GET", "/pipelines", None).await;
        assert_eq!(fields[0]["output_field"], "vector");
        assert_eq!(fields[0]["current_version"], 1);
        assert_eq!(fields[0]["latest_version"], 2);
    }

    #[tokio::test]
    async fn test_unknown_pipeline_is_not_found() {
        let (status, body) = send(&app(), "GET", "/pipelines/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["category"], "not_found");
        assert!(body["error"].as_str().unwrap().contains("nope"));
    }

    #[tokio::test]
    async fn test_invalid_definition_is_bad_request() {
        let (status, body) = send(
            &app(),
            "POST",
            "/pipelines",
            Some(json!({ "output_field": "vector", "composition": ["message"], "dimension": 0 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["category"], "validation");
    }

    #[tokio::test]
    async fn test_ingest_then_search() {
        let app = app();
        register(&app, &["message"]).await;

        for (id, message) in [("a", "enrich start"), ("b", "payment failed")] {
            let (status, report) = send(
                &app,
                "POST",
                "/records",
                Some(json!({ "id": id, "attributes": { "message": message } })),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
            assert_eq!(report["fields"][0]["status"], "written");
        }

        let (status, body) = send(
            &app,
            "POST",
            "/search",
            Some(json!({
                "output_field": "vector",
                "query": { "text": "payment failed" },
                "k": 1,
                "fields": ["message"],
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pipeline_version"], 1);
        assert_eq!(body["hits"][0]["id"], "b");
        assert_eq!(body["hits"][0]["fields"]["message"], "payment failed");
    }

    #[tokio::test]
    async fn test_search_wrong_dimension() {
        let app = app();
        register(&app, &["message"]).await;
        let (status, body) = send(
            &app,
            "POST",
            "/search",
            Some(json!({
                "output_field": "vector",
                "query": { "vector": [0.1, 0.2] },
                "k": 1,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["category"], "validation");
    }

    #[tokio::test]
    async fn test_synchronous_job_then_clear() {
        let app = app();
        register(&app, &["message"]).await;
        for i in 0..25 {
            let record = json!({
                "id": format!("r{i}"),
                "attributes": { "message": format!("event {i}") },
            });
            send(&app, "POST", "/records", Some(record)).await;
        }

        let (status, job) = send(
            &app,
            "POST",
            "/jobs",
            Some(json!({ "output_field": "vector", "async": false })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(job["status"], "completed");
        let id = job["id"].as_str().unwrap().to_string();

        let (status, fetched) = send(&app, "GET", &format!("/jobs/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["id"], id.as_str());

        let (_, jobs) = send(&app, "GET", "/jobs", None).await;
        assert_eq!(jobs.as_array().unwrap().len(), 1);

        // Cancelling a finished job leaves it as it was.
        let (status, cancelled) = send(&app, "POST", &format!("/jobs/{id}/cancel"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cancelled["status"], "completed");

        let (status, _) = send(&app, "DELETE", &format!("/jobs/{id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, "GET", &format!("/jobs/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_async_job_accepted() {
        let app = app();
        register(&app, &["message"]).await;
        let (status, job) = send(
            &app,
            "POST",
            "/jobs",
            Some(json!({ "output_field": "vector" })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(job["output_field"], "vector");
    }

    #[tokio::test]
    async fn test_job_for_unknown_field() {
        let (status, body) = send(
            &app(),
            "POST",
            "/jobs",
            Some(json!({ "output_field": "missing" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["category"], "not_found");
    }

    #[tokio::test]
    async fn test_malformed_job_id() {
        let (status, body) = send(&app(), "GET", "/jobs/not-a-uuid", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["category"], "validation");
    }
}

//! Route handlers.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use semvec_core::Record;
use semvec_pipeline::{FieldSummary, IndexReport, PipelineDefinition, PipelineSpec};
use semvec_reprocess::{JobId, JobRequest, ReprocessJob};
use semvec_search::{SearchRequest, SearchResponse};
use semvec_storage::VectorFieldSchema;

use crate::ApiState;
use crate::error::ApiResult;

/// Body of `POST /pipelines/{field}/activate`.
#[derive(Debug, Deserialize)]
pub struct ActivateBody {
    /// Version to make active.
    pub version: u64,
}

/// Body of `POST /jobs`.
#[derive(Debug, Deserialize)]
pub struct SubmitBody {
    /// The job to run.
    #[serde(flatten)]
    pub request: JobRequest,
    /// Return as soon as the job is accepted instead of when it finishes.
    #[serde(default = "default_async", rename = "async")]
    pub run_async: bool,
}

fn default_async() -> bool {
    true
}

pub(crate) async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn register_pipeline(
    State(state): State<ApiState>,
    Json(spec): Json<PipelineSpec>,
) -> ApiResult<(StatusCode, Json<PipelineDefinition>)> {
    spec.validate()?;
    state
        .storage
        .declare_vector_field(&VectorFieldSchema::new(&spec.output_field, spec.dimension))
        .await?;
    let definition = state.registry.register(spec).await?;
    Ok((StatusCode::CREATED, Json(definition)))
}

pub(crate) async fn list_pipelines(State(state): State<ApiState>) -> Json<Vec<FieldSummary>> {
    Json(state.registry.fields().await)
}

pub(crate) async fn current_pipeline(
    State(state): State<ApiState>,
    Path(field): Path<String>,
) -> ApiResult<Json<PipelineDefinition>> {
    Ok(Json(state.registry.current(&field).await?))
}

pub(crate) async fn pipeline_versions(
    State(state): State<ApiState>,
    Path(field): Path<String>,
) -> ApiResult<Json<Vec<PipelineDefinition>>> {
    Ok(Json(state.registry.versions(&field).await?))
}

pub(crate) async fn activate_pipeline(
    State(state): State<ApiState>,
    Path(field): Path<String>,
    Json(body): Json<ActivateBody>,
) -> ApiResult<Json<PipelineDefinition>> {
    Ok(Json(state.registry.activate(&field, body.version).await?))
}

pub(crate) async fn submit_job(
    State(state): State<ApiState>,
    Json(body): Json<SubmitBody>,
) -> ApiResult<(StatusCode, Json<ReprocessJob>)> {
    if body.run_async {
        let job = state.reprocessor.submit(body.request).await?;
        Ok((StatusCode::ACCEPTED, Json(job)))
    } else {
        let job = state.reprocessor.run(body.request).await?;
        Ok((StatusCode::OK, Json(job)))
    }
}

pub(crate) async fn list_jobs(State(state): State<ApiState>) -> ApiResult<Json<Vec<ReprocessJob>>> {
    Ok(Json(state.reprocessor.list().await?))
}

pub(crate) async fn job_status(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ReprocessJob>> {
    let id: JobId = id.parse()?;
    Ok(Json(state.reprocessor.status(&id).await?))
}

pub(crate) async fn cancel_job(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ReprocessJob>> {
    let id: JobId = id.parse()?;
    Ok(Json(state.reprocessor.cancel(&id).await?))
}

pub(crate) async fn resume_job(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<ReprocessJob>)> {
    let id: JobId = id.parse()?;
    let job = state.reprocessor.resume(&id).await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

pub(crate) async fn clear_job(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id: JobId = id.parse()?;
    state.reprocessor.clear(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn search(
    State(state): State<ApiState>,
    Json(request): Json<SearchRequest>,
) -> ApiResult<Json<SearchResponse>> {
    debug!("Search on {} (k={})", request.output_field, request.k);
    Ok(Json(state.gateway.search(request).await?))
}

pub(crate) async fn ingest_record(
    State(state): State<ApiState>,
    Json(record): Json<Record>,
) -> ApiResult<(StatusCode, Json<IndexReport>)> {
    let report = state.indexer.index(record).await?;
    Ok((StatusCode::CREATED, Json(report)))
}

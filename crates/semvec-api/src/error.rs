//! Mapping from semvec errors to HTTP responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::warn;

use semvec_core::{Error, FaultCategory};

/// An [`Error`] rendered as `{ "error": ..., "category": ... }`.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

/// HTTP status for a fault category.
pub fn status_for(category: FaultCategory) -> StatusCode {
    match category {
        FaultCategory::Validation => StatusCode::BAD_REQUEST,
        FaultCategory::NotFound => StatusCode::NOT_FOUND,
        FaultCategory::Data => StatusCode::UNPROCESSABLE_ENTITY,
        FaultCategory::Transient => StatusCode::SERVICE_UNAVAILABLE,
        FaultCategory::Systemic => StatusCode::BAD_GATEWAY,
        FaultCategory::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let category = self.0.category();
        let status = status_for(category);
        if status.is_server_error() {
            warn!("Request failed ({}): {}", category, self.0);
        }
        let body = json!({
            "error": self.0.to_string(),
            "category": category,
        });
        (status, Json(body)).into_response()
    }
}

/// Handler result.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

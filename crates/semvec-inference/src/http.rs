//! HTTP inference service.
//!
//! Speaks the ML-Commons `_predict` dialect used by sparse encoding models:
//!
//! ```text
//! POST {base_url}/_plugins/_ml/models/{model_id}/_predict
//! { "text_docs": ["canonical text"] }
//!
//! → { "inference_results": [ { "output": [ { "dataAsMap": { "response": [ { "token": 0.42, ... } ] } } ] } ] }
//! ```

use async_trait::async_trait;
use std::time::Duration;

use semvec_core::{Error, Result, WeightedTermMap};

use crate::service::InferenceService;

const SERVICE: &str = "inference";

/// Inference service reached over HTTP.
pub struct HttpInferenceService {
    base_url: String,
    model_id: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpInferenceService {
    /// Creates a new HTTP inference service.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Service root, e.g. `http://localhost:9200`
    /// * `model_id` - Deployed sparse model identifier
    /// * `timeout` - Per-request timeout enforced by the HTTP client
    pub fn new(
        base_url: impl Into<String>,
        model_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("failed to build inference client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model_id: model_id.into(),
            timeout,
            client,
        })
    }

    fn predict_url(&self) -> String {
        format!(
            "{}/_plugins/_ml/models/{}/_predict",
            self.base_url, self.model_id
        )
    }

    /// Map a transport-level failure onto the fault taxonomy.
    fn classify_transport(&self, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::timeout(
                SERVICE,
                u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            )
        } else if err.is_decode() {
            Error::malformed(SERVICE, err.to_string())
        } else {
            Error::unavailable(SERVICE, err.to_string())
        }
    }
}

/// Extract the weighted-term map from a `_predict` response body.
pub fn parse_predict_response(body: &serde_json::Value) -> Result<WeightedTermMap> {
    let response = body
        .pointer("/inference_results/0/output/0/dataAsMap/response/0")
        .ok_or_else(|| Error::malformed(SERVICE, "missing inference_results[0].output[0]"))?;

    let terms = response
        .as_object()
        .ok_or_else(|| Error::malformed(SERVICE, "response entry is not an object"))?;

    let mut map = WeightedTermMap::new();
    for (token, weight) in terms {
        let weight = weight.as_f64().ok_or_else(|| {
            Error::malformed(SERVICE, format!("weight for '{token}' is not a number"))
        })?;
        map.insert(token.clone(), weight as f32)
            .map_err(|e| Error::malformed(SERVICE, e.to_string()))?;
    }
    Ok(map)
}

#[async_trait]
impl InferenceService for HttpInferenceService {
    async fn infer(&self, text: &str) -> Result<WeightedTermMap> {
        let body = serde_json::json!({ "text_docs": [text] });

        let response = self
            .client
            .post(self.predict_url())
            .json(&body)
            .send()
            .await
            .map_err(|e| self.classify_transport(e))?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::unavailable(
                SERVICE,
                format!("status {status}: {detail}"),
            ));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::invalid_data(format!(
                "inference rejected request with status {status}: {detail}"
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| self.classify_transport(e))?;
        parse_predict_response(&body)
    }

    fn name(&self) -> &str {
        "http"
    }
}

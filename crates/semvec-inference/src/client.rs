//! The inference client used by the embedding pipeline.
//!
//! `InferenceClient` is the single entry point the pipeline uses to turn
//! canonical text into a weighted-term map. It decides what happens to empty
//! compositions before any network call is made, and delegates everything
//! else to a [`RetryWrapper`] around the configured service.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use semvec_core::{Error, Result, RetryPolicy, WeightedTermMap};

use crate::retry::RetryWrapper;
use crate::service::InferenceService;

/// What to do with a record whose composed text is empty or whitespace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyTextPolicy {
    /// Skip inference and emit a zero vector.
    #[default]
    ZeroVector,
    /// Leave the record without a vector for this pass.
    Skip,
    /// Count the record as failed.
    Fail,
}

/// Result of running inference for one record.
#[derive(Debug, Clone, PartialEq)]
pub enum InferenceOutcome {
    /// Terms to normalize (possibly empty).
    Terms(WeightedTermMap),
    /// The record should not be written.
    Skipped,
}

/// Settings for [`InferenceClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceClientConfig {
    /// Empty composition handling.
    #[serde(default)]
    pub empty_text: EmptyTextPolicy,

    /// Retry policy for transient faults.
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Timeout applied to every attempt, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for InferenceClientConfig {
    fn default() -> Self {
        Self {
            empty_text: EmptyTextPolicy::default(),
            retry: RetryPolicy::default(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Client for the external inference service.
pub struct InferenceClient {
    service: RetryWrapper,
    empty_text: EmptyTextPolicy,
}

impl InferenceClient {
    /// Create a client around `service` with the given settings.
    pub fn new(service: Arc<dyn InferenceService>, config: InferenceClientConfig) -> Self {
        let service = RetryWrapper::new(service)
            .with_policy(config.retry)
            .with_timeout(Duration::from_millis(config.timeout_ms));
        Self {
            service,
            empty_text: config.empty_text,
        }
    }

    /// The configured empty-text policy.
    pub fn empty_text_policy(&self) -> EmptyTextPolicy {
        self.empty_text
    }

    /// The wrapped service name.
    pub fn service_name(&self) -> &str {
        self.service.name()
    }

    /// Run inference for the record `record_id` whose composed text is `text`.
    ///
    /// # Errors
    ///
    /// - [`Error::EmptyComposition`] when `text` is blank and the policy is
    ///   [`EmptyTextPolicy::Fail`]
    /// - the last transient error once retries are exhausted
    /// - any non-transient service error, unretried
    pub async fn infer(&self, record_id: &str, text: &str) -> Result<InferenceOutcome> {
        if text.trim().is_empty() {
            debug!("record {} composed to empty text ({:?})", record_id, self.empty_text);
            return match self.empty_text {
                EmptyTextPolicy::ZeroVector => Ok(InferenceOutcome::Terms(WeightedTermMap::new())),
                EmptyTextPolicy::Skip => Ok(InferenceOutcome::Skipped),
                EmptyTextPolicy::Fail => Err(Error::EmptyComposition(record_id.to_string())),
            };
        }

        self.service.infer(text).await.map(InferenceOutcome::Terms)
    }
}

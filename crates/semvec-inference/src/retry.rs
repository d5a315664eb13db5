//! Retry wrapper for inference services.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use semvec_core::{Result, RetryPolicy, WeightedTermMap, with_timeout};

use crate::service::InferenceService;

/// Wraps an inference service with per-attempt timeouts and retry logic.
pub struct RetryWrapper {
    inner: Arc<dyn InferenceService>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl RetryWrapper {
    /// Creates a new retry wrapper with default settings.
    ///
    /// Default settings:
    /// - Retry policy: [`RetryPolicy::default`]
    /// - Per-attempt timeout: 30 seconds
    pub fn new(service: Arc<dyn InferenceService>) -> Self {
        Self {
            inner: service,
            policy: RetryPolicy::default(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Sets the retry policy.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl InferenceService for RetryWrapper {
    async fn infer(&self, text: &str) -> Result<WeightedTermMap> {
        let service = self.inner.clone();
        let timeout = self.timeout;

        self.policy
            .run("inference", || {
                let service = service.clone();
                async move { with_timeout("inference", timeout, service.infer(text)).await }
            })
            .await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

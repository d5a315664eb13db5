//! Mock inference service for testing.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use semvec_core::{Error, Result, WeightedTermMap};

use crate::service::InferenceService;

/// How an injected failure presents itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// The service refuses the connection.
    Unavailable,
    /// The service answers with an unusable body.
    Malformed,
}

type FailPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Mock inference service that derives term weights from the text itself.
///
/// Text is lowercased and split on non-alphanumeric characters. Each distinct
/// token gets a weight derived from its bytes, multiplied by its occurrence
/// count, so the same text always yields the same map. Failures can be
/// injected for texts matching a predicate.
#[derive(Clone)]
pub struct MockInferenceService {
    fail_when: Option<(FailPredicate, FailureMode)>,
    calls: Arc<AtomicU64>,
}

impl Default for MockInferenceService {
    fn default() -> Self {
        Self::new()
    }
}

impl MockInferenceService {
    /// Create a mock service that never fails.
    pub fn new() -> Self {
        Self {
            fail_when: None,
            calls: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Fail every call whose text matches `predicate`.
    pub fn fail_when<F>(mut self, mode: FailureMode, predicate: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.fail_when = Some((Arc::new(predicate), mode));
        self
    }

    /// Number of calls that reached the service, failures included.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// The deterministic term map for `text`.
    pub fn terms_for(text: &str) -> WeightedTermMap {
        let mut counts: std::collections::HashMap<String, u32> = std::collections::HashMap::new();
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            *counts.entry(token.to_lowercase()).or_default() += 1;
        }

        let mut map = WeightedTermMap::new();
        for (token, count) in counts {
            let spread = token
                .bytes()
                .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(u32::from(b)))
                % 1000;
            let weight = (spread as f32 + 1.0) / 1000.0 * count as f32;
            // Weights are positive and finite by construction.
            let _ = map.insert(token, weight);
        }
        map
    }
}

#[async_trait]
impl InferenceService for MockInferenceService {
    async fn infer(&self, text: &str) -> Result<WeightedTermMap> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some((predicate, mode)) = &self.fail_when {
            if predicate(text) {
                return Err(match mode {
                    FailureMode::Unavailable => {
                        Error::unavailable("inference", "mock service refused the request")
                    }
                    FailureMode::Malformed => Error::malformed("inference", "mock garbage body"),
                });
            }
        }

        Ok(Self::terms_for(text))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_infer_deterministic() {
        let service = MockInferenceService::new();
        let a = service.infer("enrich start enrich").await.unwrap();
        let b = service.infer("enrich start enrich").await.unwrap();

        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
        assert!(a.get("enrich").unwrap() > 0.0);
        assert_eq!(service.calls(), 2);
    }

    #[tokio::test]
    async fn test_mock_counts_repeated_tokens() {
        let once = MockInferenceService::terms_for("alpha");
        let twice = MockInferenceService::terms_for("alpha ALPHA");
        let w1 = once.get("alpha").unwrap();
        let w2 = twice.get("alpha").unwrap();
        assert!((w2 - 2.0 * w1).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_mock_empty_text() {
        let service = MockInferenceService::new();
        let map = service.infer("").await.unwrap();
        assert!(map.is_empty());
    }

    #[tokio::test]
    async fn test_mock_injected_failure() {
        let service =
            MockInferenceService::new().fail_when(FailureMode::Unavailable, |t| t.contains("boom"));

        assert!(service.infer("fine").await.is_ok());
        let err = service.infer("boom now").await.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.is_unreachable());
        assert_eq!(service.calls(), 2);
    }

    #[tokio::test]
    async fn test_mock_malformed_failure() {
        let service = MockInferenceService::new().fail_when(FailureMode::Malformed, |_| true);
        let err = service.infer("x").await.unwrap_err();
        assert!(matches!(err, Error::MalformedResponse { .. }));
    }

    #[test]
    fn test_mock_clone_shares_counter() {
        let service = MockInferenceService::new();
        let clone = service.clone();
        clone.calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(service.calls(), 1);
    }
}

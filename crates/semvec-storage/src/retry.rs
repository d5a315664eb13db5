//! Timeout and retry decorator for storage engines.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use semvec_core::{Record, RecordFilter, Result, RetryPolicy, with_timeout};

use crate::engine::{
    NearestQuery, ReadRequest, RecordPage, ScoredRecord, StorageEngine, UpdateOutcome,
    VectorFieldSchema, VectorUpdate,
};

const SERVICE: &str = "storage";

/// Wraps a storage engine with per-call timeouts and bounded retries.
///
/// Bulk updates are safe to retry: they only overwrite a vector field and
/// its version marker with the same values.
pub struct RetryingStorage {
    inner: Arc<dyn StorageEngine>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl RetryingStorage {
    /// Wrap `inner` with the default policy and a 10 second timeout.
    pub fn new(inner: Arc<dyn StorageEngine>) -> Self {
        Self {
            inner,
            policy: RetryPolicy::default(),
            timeout: Duration::from_secs(10),
        }
    }

    /// Sets the retry policy.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl StorageEngine for RetryingStorage {
    async fn declare_vector_field(&self, schema: &VectorFieldSchema) -> Result<()> {
        let timeout = self.timeout;
        self.policy
            .run("declare_vector_field", || {
                let inner = self.inner.clone();
                async move {
                    with_timeout(SERVICE, timeout, inner.declare_vector_field(schema)).await
                }
            })
            .await
    }

    async fn put_record(&self, record: &Record) -> Result<()> {
        let timeout = self.timeout;
        self.policy
            .run("put_record", || {
                let inner = self.inner.clone();
                async move { with_timeout(SERVICE, timeout, inner.put_record(record)).await }
            })
            .await
    }

    async fn get_record(&self, id: &str) -> Result<Option<Record>> {
        let timeout = self.timeout;
        self.policy
            .run("get_record", || {
                let inner = self.inner.clone();
                async move { with_timeout(SERVICE, timeout, inner.get_record(id)).await }
            })
            .await
    }

    async fn read_batch(&self, request: &ReadRequest) -> Result<RecordPage> {
        let timeout = self.timeout;
        self.policy
            .run("read_batch", || {
                let inner = self.inner.clone();
                async move { with_timeout(SERVICE, timeout, inner.read_batch(request)).await }
            })
            .await
    }

    async fn update_vectors(&self, updates: &[VectorUpdate]) -> Result<Vec<UpdateOutcome>> {
        let timeout = self.timeout;
        self.policy
            .run("update_vectors", || {
                let inner = self.inner.clone();
                async move { with_timeout(SERVICE, timeout, inner.update_vectors(updates)).await }
            })
            .await
    }

    async fn nearest(&self, query: &NearestQuery) -> Result<Vec<ScoredRecord>> {
        let timeout = self.timeout;
        self.policy
            .run("nearest", || {
                let inner = self.inner.clone();
                async move { with_timeout(SERVICE, timeout, inner.nearest(query)).await }
            })
            .await
    }

    async fn count(&self, filter: &RecordFilter) -> Result<u64> {
        let timeout = self.timeout;
        self.policy
            .run("count", || {
                let inner = self.inner.clone();
                async move { with_timeout(SERVICE, timeout, inner.count(filter)).await }
            })
            .await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

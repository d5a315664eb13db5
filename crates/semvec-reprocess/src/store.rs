//! Job persistence.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use semvec_core::Result;

use crate::job::{JobId, ReprocessJob};

/// Persists reprocessing jobs between checkpoints and across restarts.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert or replace a job.
    async fn save(&self, job: &ReprocessJob) -> Result<()>;

    /// Load a job.
    async fn load(&self, id: &JobId) -> Result<Option<ReprocessJob>>;

    /// All jobs, oldest first.
    async fn list(&self) -> Result<Vec<ReprocessJob>>;

    /// Remove a job; `false` if it did not exist.
    async fn delete(&self, id: &JobId) -> Result<bool>;
}

/// Job store kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<JobId, ReprocessJob>>,
}

impl MemoryJobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn save(&self, job: &ReprocessJob) -> Result<()> {
        self.jobs.write().await.insert(job.id, job.clone());
        Ok(())
    }

    async fn load(&self, id: &JobId) -> Result<Option<ReprocessJob>> {
        Ok(self.jobs.read().await.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<ReprocessJob>> {
        let mut jobs: Vec<_> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }

    async fn delete(&self, id: &JobId) -> Result<bool> {
        Ok(self.jobs.write().await.remove(id).is_some())
    }
}

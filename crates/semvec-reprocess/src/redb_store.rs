//! Durable job store backed by redb.
//!
//! Jobs are stored as JSON under their id in a single table. Each save is
//! its own write transaction, so a checkpoint is either fully visible after
//! a crash or not at all.

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::path::Path;
use std::sync::Arc;

use semvec_core::{Error, Result};

use crate::job::{JobId, ReprocessJob};
use crate::store::JobStore;

const JOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("jobs");

fn db_err(err: impl Into<redb::Error>) -> Error {
    Error::storage(format!("job store: {}", err.into()))
}

/// Job store persisted to a redb file.
#[derive(Clone)]
pub struct RedbJobStore {
    db: Arc<Database>,
}

impl RedbJobStore {
    /// Open or create the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(db_err)?;

        let txn = db.begin_write().map_err(db_err)?;
        txn.open_table(JOBS).map_err(db_err)?;
        txn.commit().map_err(db_err)?;

        Ok(Self { db: Arc::new(db) })
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| Error::storage(format!("job store task failed: {e}")))?
    }
}

#[async_trait]
impl JobStore for RedbJobStore {
    async fn save(&self, job: &ReprocessJob) -> Result<()> {
        let key = job.id.to_string();
        let bytes = serde_json::to_vec(job)?;
        self.blocking(move |db| {
            let txn = db.begin_write().map_err(db_err)?;
            {
                let mut table = txn.open_table(JOBS).map_err(db_err)?;
                table
                    .insert(key.as_str(), bytes.as_slice())
                    .map_err(db_err)?;
            }
            txn.commit().map_err(db_err)
        })
        .await
    }

    async fn load(&self, id: &JobId) -> Result<Option<ReprocessJob>> {
        let key = id.to_string();
        self.blocking(move |db| {
            let txn = db.begin_read().map_err(db_err)?;
            let table = txn.open_table(JOBS).map_err(db_err)?;
            match table.get(key.as_str()).map_err(db_err)? {
                Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn list(&self) -> Result<Vec<ReprocessJob>> {
        let mut jobs = self
            .blocking(|db| {
                let txn = db.begin_read().map_err(db_err)?;
                let table = txn.open_table(JOBS).map_err(db_err)?;
                let mut jobs = Vec::new();
                for entry in table.iter().map_err(db_err)? {
                    let (_, value) = entry.map_err(db_err)?;
                    jobs.push(serde_json::from_slice::<ReprocessJob>(value.value())?);
                }
                Ok(jobs)
            })
            .await?;
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }

    async fn delete(&self, id: &JobId) -> Result<bool> {
        let key = id.to_string();
        self.blocking(move |db| {
            let txn = db.begin_write().map_err(db_err)?;
            let removed = {
                let mut table = txn.open_table(JOBS).map_err(db_err)?;
                table.remove(key.as_str()).map_err(db_err)?.is_some()
            };
            txn.commit().map_err(db_err)?;
            Ok(removed)
        })
        .await
    }
}

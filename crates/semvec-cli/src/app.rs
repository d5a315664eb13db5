//! Service wiring and logging for the semvec binary.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use semvec_core::{Error, Result};
use semvec_inference::{
    HttpInferenceService, InferenceClient, InferenceService, MockInferenceService,
};
use semvec_pipeline::{EmbeddingPipeline, Indexer, PipelineRegistry};
use semvec_reprocess::{JobStore, RedbJobStore, Reprocessor};
use semvec_search::SearchGateway;
use semvec_storage::{HttpStorageEngine, MemoryStorageEngine, RetryingStorage, StorageEngine};

use crate::config::{InferenceBackend, SemvecConfig, StorageBackend};

/// Registry file name inside the state directory.
pub const REGISTRY_FILE: &str = "pipelines.json";
/// Job database file name inside the state directory.
pub const JOBS_FILE: &str = "jobs.redb";

/// Initialise tracing-based logging on stderr.
///
/// Uses `RUST_LOG` env var if set, otherwise defaults based on verbosity flags.
pub fn init_logging(verbose: bool, quiet: bool) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if quiet {
        EnvFilter::new("warn")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    // Ignore error if a subscriber is already set (e.g. in tests).
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Every service a command may need, built from one configuration.
pub struct Services {
    /// Pipeline definition registry, persisted in the state directory.
    pub registry: Arc<PipelineRegistry>,
    /// Storage engine wrapped with timeouts and retries.
    pub storage: Arc<dyn StorageEngine>,
    /// Bulk reprocessor over the persisted job store.
    pub reprocessor: Reprocessor,
    /// Query gateway.
    pub gateway: Arc<SearchGateway>,
    /// Automatic ingest for the configured fields.
    pub indexer: Arc<Indexer>,
}

impl Services {
    /// Build the services described by `config`.
    pub async fn build(config: &SemvecConfig) -> Result<Self> {
        let state_dir = config.state_dir();
        tokio::fs::create_dir_all(&state_dir).await?;
        debug!("Using state directory {}", state_dir.display());

        let registry = Arc::new(PipelineRegistry::open(state_dir.join(REGISTRY_FILE)).await?);
        let storage = build_storage(config)?;
        let client =
            InferenceClient::new(build_inference(config)?, config.inference.client_config());
        let pipeline = EmbeddingPipeline::new(Arc::new(client));

        let store: Arc<dyn JobStore> = Arc::new(open_job_store(state_dir.join(JOBS_FILE)).await?);
        let reprocessor = Reprocessor::new(
            storage.clone(),
            registry.clone(),
            pipeline.clone(),
            store,
            config.reprocess.clone(),
        )?;
        let gateway = Arc::new(SearchGateway::new(
            registry.clone(),
            pipeline.clone(),
            storage.clone(),
            config.search.default_candidates,
        ));
        let indexer = Arc::new(Indexer::new(
            registry.clone(),
            pipeline,
            storage.clone(),
            config.ingest.fields.clone(),
        ));

        Ok(Self {
            registry,
            storage,
            reprocessor,
            gateway,
            indexer,
        })
    }

    /// The API state over these services.
    pub fn api_state(&self) -> semvec_api::ApiState {
        semvec_api::ApiState::new(
            self.registry.clone(),
            self.reprocessor.clone(),
            self.gateway.clone(),
            self.indexer.clone(),
            self.storage.clone(),
        )
    }
}

async fn open_job_store(path: PathBuf) -> Result<RedbJobStore> {
    tokio::task::spawn_blocking(move || RedbJobStore::open(path))
        .await
        .map_err(|e| Error::storage(format!("job store open task failed: {e}")))?
}

fn build_storage(config: &SemvecConfig) -> Result<Arc<dyn StorageEngine>> {
    let settings = &config.storage;
    let inner: Arc<dyn StorageEngine> = match settings.backend {
        StorageBackend::Memory => {
            info!("Using in-memory storage; records are not persisted");
            Arc::new(MemoryStorageEngine::new())
        }
        StorageBackend::Http => {
            info!("Using storage index '{}' at {}", settings.index, settings.url);
            Arc::new(HttpStorageEngine::new(
                &settings.url,
                &settings.index,
                settings.timeout(),
            )?)
        }
    };
    Ok(Arc::new(
        RetryingStorage::new(inner)
            .with_policy(settings.retry_policy())
            .with_timeout(settings.timeout()),
    ))
}

fn build_inference(config: &SemvecConfig) -> Result<Arc<dyn InferenceService>> {
    let settings = &config.inference;
    Ok(match settings.backend {
        InferenceBackend::Mock => Arc::new(MockInferenceService::new()),
        InferenceBackend::Http => {
            if settings.model_id.is_empty() {
                return Err(Error::config(
                    "inference.model_id is required for the http backend",
                ));
            }
            info!("Using inference model '{}' at {}", settings.model_id, settings.url);
            Arc::new(HttpInferenceService::new(
                &settings.url,
                &settings.model_id,
                std::time::Duration::from_millis(settings.timeout_ms),
            )?)
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::StateConfig;

    fn config_in(dir: &tempfile::TempDir) -> SemvecConfig {
        SemvecConfig {
            state: StateConfig {
                dir: Some(dir.path().to_string_lossy().into_owned()),
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_build_creates_state_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let services = Services::build(&config_in(&dir)).await.unwrap();
        assert_eq!(
            services.registry.path(),
            Some(dir.path().join(REGISTRY_FILE).as_path())
        );
        assert!(dir.path().join(JOBS_FILE).exists());
        assert!(services.indexer.fields().is_empty());
    }

    #[tokio::test]
    async fn test_http_inference_requires_model() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.inference.backend = InferenceBackend::Http;
        assert!(matches!(
            Services::build(&config).await,
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_init_logging_default() {
        // Should not panic
        init_logging(false, false);
        init_logging(true, false);
    }
}

//! Configuration for the semvec binary.
//!
//! [`SemvecConfig`] is loaded with `confyg` from a TOML file, overlaid by
//! `SEMVEC_*` environment variables, on top of built-in defaults.
//!
//! # Loading Priority
//!
//! 1. Explicit `--config <path>` flag
//! 2. `SEMVEC_CONFIG` environment variable
//! 3. XDG default: `~/.config/semvec/config.toml`
//! 4. Built-in defaults

use confyg::{Confygery, env};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use semvec_core::{Error, Result, RetryPolicy};
use semvec_inference::{EmptyTextPolicy, InferenceClientConfig};
use semvec_reprocess::ReprocessorConfig;

// ============================================================================
// Configuration structs
// ============================================================================

/// Main configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SemvecConfig {
    /// Where the registry and job state live.
    pub state: StateConfig,
    /// Storage engine connection.
    pub storage: StorageConfig,
    /// Inference service connection.
    pub inference: InferenceConfig,
    /// Bulk reprocessing defaults.
    pub reprocess: ReprocessorConfig,
    /// Search defaults.
    pub search: SearchConfig,
    /// HTTP API bind address.
    pub server: ServerConfig,
    /// Automatic ingest.
    pub ingest: IngestConfig,
}

/// Local state directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Directory holding `pipelines.json` and `jobs.redb`.
    pub dir: Option<String>,
}

/// Which storage engine to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// In-process engine; contents are lost on exit.
    #[default]
    Memory,
    /// OpenSearch-compatible REST endpoint.
    Http,
}

/// Storage engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend kind.
    pub backend: StorageBackend,
    /// Base URL for the `http` backend.
    pub url: String,
    /// Index name for the `http` backend.
    pub index: String,
    /// Per-call timeout.
    pub timeout_ms: u64,
    /// Attempts per call, including the first.
    pub max_attempts: u32,
    /// First retry delay.
    pub initial_backoff_ms: u64,
    /// Retry delay ceiling.
    pub max_backoff_ms: u64,
}

/// Which inference service to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceBackend {
    /// Deterministic hashing model.
    #[default]
    Mock,
    /// ML-Commons `_predict` endpoint.
    Http,
}

/// Inference service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Backend kind.
    pub backend: InferenceBackend,
    /// Base URL for the `http` backend.
    pub url: String,
    /// Deployed model id for the `http` backend.
    pub model_id: String,
    /// Per-attempt timeout.
    pub timeout_ms: u64,
    /// Attempts per call, including the first.
    pub max_attempts: u32,
    /// First retry delay.
    pub initial_backoff_ms: u64,
    /// Retry delay ceiling.
    pub max_backoff_ms: u64,
    /// What to do with records that compose to empty text.
    pub empty_text: EmptyTextPolicy,
}

/// Search configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Candidate pool when a request does not set one.
    pub default_candidates: usize,
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to listen on.
    pub port: u16,

    /// Host address to bind to.
    pub host: String,
}

/// Automatic ingest configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Output fields embedded for every ingested record.
    pub fields: Vec<String>,
}

// ============================================================================
// Default implementations
// ============================================================================

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            url: "http://localhost:9200".to_string(),
            index: "semvec".to_string(),
            timeout_ms: 10_000,
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            backend: InferenceBackend::default(),
            url: "http://localhost:9200".to_string(),
            model_id: String::new(),
            timeout_ms: 30_000,
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
            empty_text: EmptyTextPolicy::default(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_candidates: 100,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            host: "127.0.0.1".to_string(),
        }
    }
}

fn retry_policy(max_attempts: u32, initial_ms: u64, max_ms: u64) -> RetryPolicy {
    RetryPolicy::default()
        .with_max_attempts(max_attempts)
        .with_initial_delay(Duration::from_millis(initial_ms))
        .with_max_delay(Duration::from_millis(max_ms))
}

impl StorageConfig {
    /// Retry policy for storage calls.
    pub fn retry_policy(&self) -> RetryPolicy {
        retry_policy(
            self.max_attempts,
            self.initial_backoff_ms,
            self.max_backoff_ms,
        )
    }

    /// Per-call timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl InferenceConfig {
    /// Settings for the inference client.
    pub fn client_config(&self) -> InferenceClientConfig {
        InferenceClientConfig {
            empty_text: self.empty_text,
            retry: retry_policy(
                self.max_attempts,
                self.initial_backoff_ms,
                self.max_backoff_ms,
            ),
            timeout_ms: self.timeout_ms,
        }
    }
}

// ============================================================================
// Config loading
// ============================================================================

impl SemvecConfig {
    /// Load configuration from file, environment, and defaults.
    ///
    /// A config path that does not exist falls back to defaults.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder =
            Confygery::new().map_err(|e| Error::config(format!("config init: {e}")))?;

        if let Some(path) = Self::resolve_config_path(config_path) {
            if path.exists() {
                builder
                    .add_file(&path.to_string_lossy())
                    .map_err(|e| Error::config(format!("config file: {e}")))?;
            }
        }

        let mut env_opts = env::Options::with_top_level("SEMVEC");
        for section in [
            "state",
            "storage",
            "inference",
            "reprocess",
            "search",
            "server",
            "ingest",
        ] {
            env_opts.add_section(section);
        }
        builder
            .add_env(env_opts)
            .map_err(|e| Error::config(format!("config env: {e}")))?;

        builder
            .build()
            .map_err(|e| Error::config(format!("config build: {e}")))
    }

    /// Resolve the config file path from explicit flag, env var, or XDG default.
    pub fn resolve_config_path(explicit: Option<&str>) -> Option<PathBuf> {
        Self::resolve_config_path_with(explicit, std::env::var("SEMVEC_CONFIG").ok())
    }

    fn resolve_config_path_with(
        explicit: Option<&str>,
        from_env: Option<String>,
    ) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(PathBuf::from(path));
        }
        if let Some(path) = from_env {
            return Some(PathBuf::from(path));
        }
        Self::default_config_path()
    }

    /// Return the XDG default config path.
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("semvec").join("config.toml"))
    }

    /// Directory for the registry file and job database.
    pub fn state_dir(&self) -> PathBuf {
        match &self.state.dir {
            Some(dir) => PathBuf::from(dir),
            None => dirs::data_dir()
                .map(|d| d.join("semvec"))
                .unwrap_or_else(|| PathBuf::from(".semvec")),
        }
    }

    /// Serialize this config to a pretty-printed TOML string.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::config(e.to_string()))
    }
}

// ============================================================================
// Tests
// ============================================================================

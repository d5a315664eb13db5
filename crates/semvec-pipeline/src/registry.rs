//! Versioned pipeline registry.
//!
//! The registry is the single source of truth for which definition produces
//! each output field. Versions are append-only per field; exactly one is
//! active. Mutations take the write lock for their whole duration (including
//! persistence), so version numbers are assigned without gaps. Reads return
//! owned snapshots.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

use semvec_core::{Error, Result};

use crate::definition::{PipelineDefinition, PipelineSpec};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct FieldHistory {
    active: u64,
    versions: Vec<PipelineDefinition>,
}

impl FieldHistory {
    fn get(&self, version: u64) -> Option<&PipelineDefinition> {
        self.versions.iter().find(|d| d.version == version)
    }

    fn latest(&self) -> u64 {
        self.versions.iter().map(|d| d.version).max().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RegistryState {
    fields: BTreeMap<String, FieldHistory>,
}

/// Summary of one output field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSummary {
    /// Output field name.
    pub output_field: String,
    /// Active version.
    pub current_version: u64,
    /// Highest registered version.
    pub latest_version: u64,
    /// Vector length shared by every version.
    pub dimension: usize,
}

/// Registry of pipeline definitions keyed by output field.
#[derive(Debug, Default)]
pub struct PipelineRegistry {
    state: RwLock<RegistryState>,
    path: Option<PathBuf>,
}

impl PipelineRegistry {
    /// Create an in-memory registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a registry persisted at `path`, loading it if the file exists.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let state: RegistryState = serde_json::from_str(&content)?;
                info!(
                    "Loaded pipeline registry from {} ({} fields)",
                    path.display(),
                    state.fields.len()
                );
                state
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => RegistryState::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            state: RwLock::new(state),
            path: Some(path),
        })
    }

    /// Persistence path, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn persist(&self, state: &RegistryState) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_string_pretty(state)?).await?;
        tokio::fs::rename(&tmp, path).await?;
        debug!("Persisted pipeline registry to {}", path.display());
        Ok(())
    }

    /// Register a new version for `spec.output_field` and make it active.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] when the spec is invalid or its dimension differs
    /// from the field's existing versions.
    pub async fn register(&self, spec: PipelineSpec) -> Result<PipelineDefinition> {
        spec.validate()?;

        let mut state = self.state.write().await;
        let mut next = state.clone();
        let history = next.fields.entry(spec.output_field.clone()).or_default();
        if let Some(existing) = history.versions.first() {
            if existing.dimension != spec.dimension {
                return Err(Error::validation(format!(
                    "field '{}' has dimension {}; changing it to {} requires a new output field",
                    spec.output_field, existing.dimension, spec.dimension
                )));
            }
        }

        let definition = PipelineDefinition::from_spec(spec, history.latest() + 1);
        history.active = definition.version;
        history.versions.push(definition.clone());

        self.persist(&next).await?;
        *state = next;
        info!(
            "Registered pipeline {} v{} ({} attributes, dimension {})",
            definition.output_field,
            definition.version,
            definition.composition.len(),
            definition.dimension
        );
        Ok(definition)
    }

    /// The active definition for `field`.
    pub async fn current(&self, field: &str) -> Result<PipelineDefinition> {
        let state = self.state.read().await;
        let history = state
            .fields
            .get(field)
            .ok_or_else(|| Error::not_found(format!("no pipeline registered for '{field}'")))?;
        history
            .get(history.active)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("active version of '{field}' is missing")))
    }

    /// A specific version of `field`.
    pub async fn get(&self, field: &str, version: u64) -> Result<PipelineDefinition> {
        let state = self.state.read().await;
        state
            .fields
            .get(field)
            .and_then(|h| h.get(version))
            .cloned()
            .ok_or_else(|| Error::not_found(format!("pipeline '{field}' v{version}")))
    }

    /// `version` of `field` when given, the active one otherwise.
    pub async fn resolve(&self, field: &str, version: Option<u64>) -> Result<PipelineDefinition> {
        match version {
            Some(v) => self.get(field, v).await,
            None => self.current(field).await,
        }
    }

    /// Make a registered version active. No stored vectors change.
    pub async fn activate(&self, field: &str, version: u64) -> Result<PipelineDefinition> {
        let mut state = self.state.write().await;
        let mut next = state.clone();
        let history = next
            .fields
            .get_mut(field)
            .ok_or_else(|| Error::not_found(format!("no pipeline registered for '{field}'")))?;
        let definition = history
            .get(version)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("pipeline '{field}' v{version}")))?;
        history.active = version;

        self.persist(&next).await?;
        *state = next;
        info!("Activated pipeline {} v{}", field, version);
        Ok(definition)
    }

    /// Every version of `field`, oldest first.
    pub async fn versions(&self, field: &str) -> Result<Vec<PipelineDefinition>> {
        let state = self.state.read().await;
        state
            .fields
            .get(field)
            .map(|h| h.versions.clone())
            .ok_or_else(|| Error::not_found(format!("no pipeline registered for '{field}'")))
    }

    /// One summary per registered output field.
    pub async fn fields(&self) -> Vec<FieldSummary> {
        let state = self.state.read().await;
        state
            .fields
            .iter()
            .map(|(name, history)| FieldSummary {
                output_field: name.clone(),
                current_version: history.active,
                latest_version: history.latest(),
                dimension: history.versions.first().map(|d| d.dimension).unwrap_or(0),
            })
            .collect()
    }
}

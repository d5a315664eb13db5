//! Pipeline definitions: what text feeds a vector field and how long it is.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use semvec_core::{Error, Result};
use semvec_storage::VectorFieldSchema;

/// A definition as submitted for registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSpec {
    /// Vector field the definition produces.
    pub output_field: String,
    /// Attribute names, in concatenation order.
    pub composition: Vec<String>,
    /// Output vector length.
    pub dimension: usize,
}

impl PipelineSpec {
    /// Create a spec.
    pub fn new(
        output_field: impl Into<String>,
        composition: impl IntoIterator<Item = impl Into<String>>,
        dimension: usize,
    ) -> Self {
        Self {
            output_field: output_field.into(),
            composition: composition.into_iter().map(Into::into).collect(),
            dimension,
        }
    }

    /// Check the spec is self-consistent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for a zero dimension, an empty output
    /// field name, an empty composition, or an empty attribute name.
    pub fn validate(&self) -> Result<()> {
        if self.output_field.trim().is_empty() {
            return Err(Error::validation("output field name must not be empty"));
        }
        if self.dimension == 0 {
            return Err(Error::validation("target dimension must be positive"));
        }
        if self.composition.is_empty() {
            return Err(Error::validation("composition must list at least one attribute"));
        }
        if self.composition.iter().any(|a| a.trim().is_empty()) {
            return Err(Error::validation("composition contains an empty attribute name"));
        }
        Ok(())
    }
}

/// A registered, versioned definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    /// Vector field the definition produces.
    pub output_field: String,
    /// Attribute names, in concatenation order.
    pub composition: Vec<String>,
    /// Output vector length.
    pub dimension: usize,
    /// Version within `output_field`, starting at 1.
    pub version: u64,
    /// When the version was registered.
    pub registered_at: DateTime<Utc>,
}

impl PipelineDefinition {
    /// Stamp a validated spec with its version.
    pub(crate) fn from_spec(spec: PipelineSpec, version: u64) -> Self {
        Self {
            output_field: spec.output_field,
            composition: spec.composition,
            dimension: spec.dimension,
            version,
            registered_at: Utc::now(),
        }
    }

    /// Storage schema for the produced field.
    pub fn schema(&self) -> VectorFieldSchema {
        VectorFieldSchema::new(&self.output_field, self.dimension)
    }
}

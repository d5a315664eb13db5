//! Record model shared by the storage engine, the pipeline, and the API.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A vector as stored on a record, tagged with the pipeline version that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredVector {
    /// Vector components; length equals the producing definition's dimension.
    pub values: Vec<f32>,

    /// Version of the pipeline definition that wrote `values`.
    pub pipeline_version: u64,
}

impl StoredVector {
    /// Create a stored vector.
    pub fn new(values: Vec<f32>, pipeline_version: u64) -> Self {
        Self {
            values,
            pipeline_version,
        }
    }

    /// The vector dimension.
    pub fn dimension(&self) -> usize {
        self.values.len()
    }
}

/// A structured text record.
///
/// Attributes are client-supplied free text keyed by attribute name. Vectors
/// are derived and keyed by output field name. Both maps are ordered so that
/// serialized records are stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Unique record identifier.
    pub id: String,

    /// Source attributes (attribute name → text).
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,

    /// Derived vectors (output field → vector).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vectors: BTreeMap<String, StoredVector>,
}

impl Record {
    /// Create a record with no attributes.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Add an attribute.
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Attach a vector to an output field.
    pub fn with_vector(mut self, field: impl Into<String>, vector: StoredVector) -> Self {
        self.vectors.insert(field.into(), vector);
        self
    }

    /// Look up an attribute value.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Look up a stored vector.
    pub fn vector(&self, field: &str) -> Option<&StoredVector> {
        self.vectors.get(field)
    }

    /// Keep only the listed attributes; an empty list keeps everything.
    pub fn project(&self, fields: &[String]) -> BTreeMap<String, String> {
        if fields.is_empty() {
            return self.attributes.clone();
        }
        fields
            .iter()
            .filter_map(|f| self.attributes.get(f).map(|v| (f.clone(), v.clone())))
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_record_builder() {
        let record = Record::new("r1")
            .with_attribute("level", "INFO")
            .with_vector("vector", StoredVector::new(vec![0.5, 0.0], 2));

        assert_eq!(record.id, "r1");
        assert_eq!(record.attribute("level"), Some("INFO"));
        assert!(record.attribute("message").is_none());
        assert_eq!(record.vector("vector").unwrap().dimension(), 2);
        assert_eq!(record.vector("vector").unwrap().pipeline_version, 2);
    }

    #[test]
    fn test_project() {
        let record = Record::new("r1")
            .with_attribute("a", "1")
            .with_attribute("b", "2");

        let projected = record.project(&["b".to_string(), "missing".to_string()]);
        assert_eq!(projected.len(), 1);
        assert_eq!(projected.get("b").unwrap(), "2");

        assert_eq!(record.project(&[]).len(), 2);
    }

    #[test]
    fn test_serialization_skips_empty_vectors() {
        let record = Record::new("r1").with_attribute("a", "x");
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("vectors"));

        let back: Record = serde_json::from_str(r#"{"id":"r2"}"#).unwrap();
        assert_eq!(back.id, "r2");
        assert!(back.attributes.is_empty());
    }
}

//! Record selection filters.
//!
//! Filters are a small declarative language that every storage engine must
//! understand: the in-memory engine evaluates them with [`RecordFilter::matches`],
//! remote engines translate them into their own query syntax.

use crate::Record;
use serde::{Deserialize, Serialize};

/// Predicate selecting a subset of records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordFilter {
    /// Every record.
    #[default]
    All,

    /// Attribute equals a value exactly.
    Term {
        /// Attribute name.
        field: String,
        /// Required value.
        value: String,
    },

    /// Attribute is present.
    Exists {
        /// Attribute name.
        field: String,
    },

    /// Attribute is absent.
    Missing {
        /// Attribute name.
        field: String,
    },

    /// Vector field is absent or was written by a version other than `version`.
    StaleVector {
        /// Output field name.
        field: String,
        /// The version considered current.
        version: u64,
    },

    /// All sub-filters match.
    And {
        /// Sub-filters.
        filters: Vec<RecordFilter>,
    },
}

impl RecordFilter {
    /// Convenience constructor for a term filter.
    pub fn term(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Term {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Convenience constructor for a stale vector filter.
    pub fn stale(field: impl Into<String>, version: u64) -> Self {
        Self::StaleVector {
            field: field.into(),
            version,
        }
    }

    /// Combine with another filter.
    pub fn and(self, other: RecordFilter) -> Self {
        match (self, other) {
            (Self::All, f) | (f, Self::All) => f,
            (Self::And { mut filters }, f) => {
                filters.push(f);
                Self::And { filters }
            }
            (f, g) => Self::And {
                filters: vec![f, g],
            },
        }
    }

    /// Evaluate the filter against a record.
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Self::All => true,
            Self::Term { field, value } => record.attribute(field) == Some(value.as_str()),
            Self::Exists { field } => record.attributes.contains_key(field),
            Self::Missing { field } => !record.attributes.contains_key(field),
            Self::StaleVector { field, version } => record
                .vector(field)
                .is_none_or(|v| v.pipeline_version != *version),
            Self::And { filters } => filters.iter().all(|f| f.matches(record)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::StoredVector;

    fn sample() -> Record {
        Record::new("r1")
            .with_attribute("level", "INFO")
            .with_vector("vector", StoredVector::new(vec![0.1], 1))
    }

    #[test]
    fn test_all_matches_everything() {
        assert!(RecordFilter::All.matches(&sample()));
        assert!(RecordFilter::default().matches(&Record::new("x")));
    }

    #[test]
    fn test_term_and_existence() {
        let r = sample();
        assert!(RecordFilter::term("level", "INFO").matches(&r));
        assert!(!RecordFilter::term("level", "WARN").matches(&r));
        assert!(RecordFilter::Exists { field: "level".into() }.matches(&r));
        assert!(RecordFilter::Missing { field: "message".into() }.matches(&r));
    }

    #[test]
    fn test_stale_vector() {
        let r = sample();
        assert!(!RecordFilter::stale("vector", 1).matches(&r));
        assert!(RecordFilter::stale("vector", 2).matches(&r));
        assert!(RecordFilter::stale("other", 1).matches(&r));
    }

    #[test]
    fn test_and_combinator() {
        let f = RecordFilter::All.and(RecordFilter::term("level", "INFO"));
        assert_eq!(f, RecordFilter::term("level", "INFO"));

        let f = f.and(RecordFilter::stale("vector", 2));
        assert!(matches!(&f, RecordFilter::And { filters } if filters.len() == 2));
        assert!(f.matches(&sample()));

        let f = f.and(RecordFilter::term("level", "WARN"));
        assert!(!f.matches(&sample()));
    }

    #[test]
    fn test_serde_tagging() {
        let json = serde_json::to_string(&RecordFilter::stale("vector", 3)).unwrap();
        assert_eq!(json, r#"{"type":"stale_vector","field":"vector","version":3}"#);

        let parsed: RecordFilter = serde_json::from_str(r#"{"type":"all"}"#).unwrap();
        assert_eq!(parsed, RecordFilter::All);
    }
}

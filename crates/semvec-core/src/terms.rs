//! The weighted-term map produced by sparse inference.
//!
//! A `WeightedTermMap` is transient: it is produced per record by the
//! inference client and consumed immediately by the vector normalizer.
//! Iteration order carries no meaning; anything that needs an order must
//! rank entries explicitly.

use crate::{Error, Result};
use std::collections::HashMap;

/// Mapping of token to non-negative, finite relevance weight.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeightedTermMap {
    terms: HashMap<String, f32>,
}

impl WeightedTermMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a map, rejecting negative or non-finite weights.
    pub fn try_from_iter<I, K>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, f32)>,
        K: Into<String>,
    {
        let mut map = Self::new();
        for (token, weight) in entries {
            map.insert(token, weight)?;
        }
        Ok(map)
    }

    /// Insert or replace a token weight.
    pub fn insert(&mut self, token: impl Into<String>, weight: f32) -> Result<()> {
        let token = token.into();
        if !weight.is_finite() || weight < 0.0 {
            return Err(Error::invalid_data(format!(
                "weight for token '{token}' must be finite and non-negative, got {weight}"
            )));
        }
        self.terms.insert(token, weight);
        Ok(())
    }

    /// Weight of a token, if present.
    pub fn get(&self, token: &str) -> Option<f32> {
        self.terms.get(token).copied()
    }

    /// Number of tokens.
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    /// Whether the map holds no tokens.
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Iterate over `(token, weight)` in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.terms.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

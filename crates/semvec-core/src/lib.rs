//! semvec core: shared types, errors, and the record model.
//!
//! This crate provides the foundational types used across all semvec crates.
//! It has no internal semvec dependencies (dependency level 0).
//!
//! # Modules
//!
//! - [`error`]: Error types, fault categories, and Result alias
//! - [`record`]: Records and stored vectors
//! - [`terms`]: Weighted-term maps produced by inference
//! - [`filter`]: Declarative record selection filters
//! - [`retry`]: Bounded exponential backoff and call timeouts

pub mod error;
pub mod filter;
pub mod record;
pub mod retry;
pub mod terms;

// Re-export key types at crate root for convenience
pub use error::{Error, FaultCategory, Result};
pub use filter::RecordFilter;
pub use record::{Record, StoredVector};
pub use retry::{RetryPolicy, with_timeout};
pub use terms::WeightedTermMap;

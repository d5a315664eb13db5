//! Error types for semvec operations.
//!
//! This module provides a common `Error` type and `Result<T>` alias used across
//! all semvec crates. Every variant belongs to exactly one [`FaultCategory`],
//! which drives retry decisions in the inference client and storage calls,
//! escalation in the bulk reprocessor, and status codes in the HTTP API.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification of a fault.
///
/// | Category | Retried | Reaches caller as |
/// |----------|---------|-------------------|
/// | `Transient` | yes, bounded backoff | record/batch failure once exhausted |
/// | `Validation` | never | synchronous rejection |
/// | `Systemic` | never | job-level failure |
/// | `Data` | never | per-record outcome, per configured policy |
/// | `NotFound` | never | synchronous rejection |
/// | `Internal` | never | synchronous error |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultCategory {
    /// Timeouts, temporary unavailability, malformed responses.
    Transient,
    /// Malformed requests or definitions.
    Validation,
    /// An external dependency is permanently unreachable.
    Systemic,
    /// A record whose content cannot produce a vector.
    Data,
    /// A referenced pipeline, job, or record does not exist.
    NotFound,
    /// Local I/O, configuration, or serialization problems.
    Internal,
}

impl std::fmt::Display for FaultCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Transient => "transient",
            Self::Validation => "validation",
            Self::Systemic => "systemic",
            Self::Data => "data",
            Self::NotFound => "not_found",
            Self::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Errors that can occur in semvec operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Pipeline, job, or record not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid data or format.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Request or definition rejected before any work was done.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A vector does not have the dimension its field requires.
    #[error("Dimension mismatch for field '{field}': expected {expected}, got {actual}")]
    DimensionMismatch {
        /// The vector field being written or searched.
        field: String,
        /// Dimension the field is configured for.
        expected: usize,
        /// Dimension that was supplied.
        actual: usize,
    },

    /// An external call did not complete in time.
    #[error("{service} timed out after {millis}ms")]
    Timeout {
        /// Service that timed out ("inference", "storage").
        service: String,
        /// Timeout that elapsed.
        millis: u64,
    },

    /// An external service is temporarily unavailable.
    #[error("{service} unavailable: {message}")]
    Unavailable {
        /// Service that failed ("inference", "storage").
        service: String,
        /// Error detail.
        message: String,
    },

    /// An external service answered with something we cannot use.
    #[error("Malformed {service} response: {message}")]
    MalformedResponse {
        /// Service that answered ("inference", "storage").
        service: String,
        /// What was wrong with the response.
        message: String,
    },

    /// A dependency is unreachable and progress is impossible.
    #[error("Systemic failure: {0}")]
    Systemic(String),

    /// Composed text was empty and the configured policy rejects it.
    #[error("Record '{0}' composed to empty text")]
    EmptyComposition(String),

    /// The storage engine rejected an operation.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl Error {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an invalid data error.
    pub fn invalid_data(msg: impl Into<String>) -> Self {
        Self::InvalidData(msg.into())
    }

    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a timeout error.
    pub fn timeout(service: impl Into<String>, millis: u64) -> Self {
        Self::Timeout {
            service: service.into(),
            millis,
        }
    }

    /// Create an unavailability error.
    pub fn unavailable(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Create a malformed response error.
    pub fn malformed(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Create a systemic failure.
    pub fn systemic(msg: impl Into<String>) -> Self {
        Self::Systemic(msg.into())
    }

    /// Create a storage error.
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// The fault category this error belongs to.
    pub fn category(&self) -> FaultCategory {
        match self {
            Self::Timeout { .. } | Self::Unavailable { .. } | Self::MalformedResponse { .. } => {
                FaultCategory::Transient
            }
            Self::Validation(_) | Self::DimensionMismatch { .. } => FaultCategory::Validation,
            Self::Systemic(_) => FaultCategory::Systemic,
            Self::EmptyComposition(_) => FaultCategory::Data,
            Self::NotFound(_) => FaultCategory::NotFound,
            Self::Io(_)
            | Self::Config(_)
            | Self::InvalidData(_)
            | Self::Serialization(_)
            | Self::Storage(_) => FaultCategory::Internal,
        }
    }

    /// Whether a retry could succeed.
    pub fn is_retryable(&self) -> bool {
        self.category() == FaultCategory::Transient
    }

    /// Whether the error indicates the remote side could not be reached at all.
    ///
    /// Malformed responses are transient but prove the service is reachable,
    /// so they do not count toward systemic escalation.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Unavailable { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias using semvec's Error type.
pub type Result<T> = std::result::Result<T, Error>;

//! Sparse inference for semvec.
//!
//! This crate wraps the external inference service that turns canonical text
//! into a weighted-term map.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    semvec-inference                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  InferenceClient   (empty-text policy)                      │
//! │  └── RetryWrapper  (per-attempt timeout, bounded backoff)   │
//! │      └── InferenceService trait                             │
//! │          ├── MockInferenceService (deterministic, faults)   │
//! │          └── HttpInferenceService (ML-Commons _predict)     │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod client;
mod http;
mod mock;
mod retry;
mod service;

pub use client::{EmptyTextPolicy, InferenceClient, InferenceClientConfig, InferenceOutcome};
pub use http::{HttpInferenceService, parse_predict_response};
pub use mock::{FailureMode, MockInferenceService};
pub use retry::RetryWrapper;
pub use service::InferenceService;

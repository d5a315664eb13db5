//! Embedding pipeline for semvec.
//!
//! A record becomes a vector in three stateless stages, driven by a
//! versioned [`PipelineDefinition`]:
//!
//! 1. [`compose`] joins the listed attributes into canonical text
//! 2. the inference client turns the text into a weighted-term map
//! 3. [`normalize`] ranks the map and projects it onto the target dimension
//!
//! [`EmbeddingPipeline`] runs the three stages; [`Indexer`] applies them to
//! newly arriving records; [`PipelineRegistry`] decides which definition is
//! active for each output field.

pub mod composer;
pub mod definition;
pub mod indexer;
pub mod normalizer;
pub mod registry;
pub mod transform;

pub use composer::{compose, compose_attributes};
pub use definition::{PipelineDefinition, PipelineSpec};
pub use indexer::{FieldOutcome, IndexReport, Indexer};
pub use normalizer::normalize;
pub use registry::{FieldSummary, PipelineRegistry};
pub use transform::EmbeddingPipeline;

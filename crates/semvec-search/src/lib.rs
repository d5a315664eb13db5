//! Search gateway for semvec.
//!
//! Queries arrive as text, as attributes, or as a precomputed vector. Text
//! and attributes go through the same compose → infer → normalize path used
//! at index time, so query and stored vectors always share a dimension and a
//! definition version. Scoring is delegated to the storage engine.

mod gateway;

pub use gateway::{SearchGateway, SearchHit, SearchQuery, SearchRequest, SearchResponse};

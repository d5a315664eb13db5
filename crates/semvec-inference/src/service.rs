//! Inference service abstraction.

use async_trait::async_trait;
use semvec_core::{Result, WeightedTermMap};

/// Abstraction over sparse inference backends.
///
/// An inference service turns canonical text into a weighted-term map. The
/// number of entries is data-dependent. Implementations must accept empty or
/// very short text and return an empty map rather than failing.
///
/// The trait requires `Send + Sync` so a single service can be shared by
/// every slice worker of a reprocessing job.
#[async_trait]
pub trait InferenceService: Send + Sync {
    /// Run inference on one canonical text.
    async fn infer(&self, text: &str) -> Result<WeightedTermMap>;

    /// The service name for diagnostics.
    fn name(&self) -> &str;
}

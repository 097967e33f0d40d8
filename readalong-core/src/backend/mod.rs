//! Generation backend.
//!
//! [`SceneGenerator`] is the seam to whatever actually produces images.
//! [`GenerationAdapter`] wraps a generator with per-attempt timeouts,
//! exponential backoff, a circuit breaker and quality-tier selection, and
//! is the only thing the scheduler talks to.

mod adapter;
mod circuit;
mod quality;
mod remote;
mod retry;

pub use adapter::GenerationAdapter;
pub use circuit::{CallPermit, CircuitBreaker, CircuitState};
pub use quality::QualityGovernor;
pub use remote::RemoteGenerator;
pub use retry::Backoff;

use crate::model::{GeneratedScene, SceneRequest};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Failures of a generation call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("Generation timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("Generation unavailable: {0}")]
    Unavailable(String),

    #[error("Remote error (status {status:?}): {message}")]
    Remote { status: Option<u16>, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl GenerationError {
    /// Whether another attempt may succeed.
    ///
    /// `Unavailable` covers an open circuit, an offline network and quota
    /// exhaustion, none of which a quick retry fixes.
    pub fn is_retryable(&self) -> bool {
        match self {
            GenerationError::Timeout { .. } | GenerationError::Network(_) => true,
            GenerationError::Remote { status, .. } => status.map_or(true, |s| s >= 500),
            GenerationError::Unavailable(_) | GenerationError::InvalidResponse(_) => false,
        }
    }
}

/// Something that turns a scene request into an image.
///
/// Implementations make a single attempt at the tier carried by the
/// request; retrying is the adapter's job.
#[async_trait]
pub trait SceneGenerator: Send + Sync {
    async fn generate(&self, request: &SceneRequest) -> Result<GeneratedScene, GenerationError>;

    /// Short name used in logs.
    fn name(&self) -> &str {
        "generator"
    }
}

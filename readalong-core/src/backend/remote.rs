//! [`SceneGenerator`] backed by the remote scene generation service.

use super::{GenerationError, SceneGenerator};
use crate::model::{GeneratedScene, SceneMetadata, SceneRequest};
use crate::prompt::ScenePrompt;
use async_trait::async_trait;
use scenegen::{GenerationRequest, SceneGen};
use std::time::Duration;
use tokio::time::Instant;

/// Remote image generation over HTTP.
pub struct RemoteGenerator {
    client: SceneGen,
}

impl RemoteGenerator {
    pub fn new(client: SceneGen) -> Self {
        Self { client }
    }

    /// Build from `SCENEGEN_API_KEY` / `SCENEGEN_BASE_URL`.
    pub fn from_env() -> Result<Self, scenegen::Error> {
        Ok(Self::new(SceneGen::from_env()?))
    }

    /// Probe the service, mapping failures like a generation call.
    pub async fn health(&self) -> Result<(), GenerationError> {
        self.client.health().await.map_err(map_error)
    }
}

#[async_trait]
impl SceneGenerator for RemoteGenerator {
    async fn generate(&self, request: &SceneRequest) -> Result<GeneratedScene, GenerationError> {
        let prompt = ScenePrompt::from_request(request);
        let (width, height) = request.tier.resolution();
        let api_request = GenerationRequest::new(prompt.prompt)
            .with_negative_prompt(prompt.negative)
            .with_seed(prompt.seed)
            .with_size(width, height)
            .with_steps(request.tier.steps());

        let started = Instant::now();
        let image = self.client.generate(api_request).await.map_err(map_error)?;

        Ok(GeneratedScene {
            sentence: request.sentence.clone(),
            metadata: SceneMetadata {
                width: image.width,
                height: image.height,
                format: image.format.into(),
                compression_ratio: image.compression_ratio(),
            },
            payload: image.data,
            generation_time: image.server_time.unwrap_or_else(|| started.elapsed()),
            tier: request.tier,
        })
    }

    fn name(&self) -> &str {
        "remote"
    }
}

fn map_error(err: scenegen::Error) -> GenerationError {
    match err {
        scenegen::Error::Timeout => GenerationError::Timeout {
            after: Duration::ZERO,
        },
        scenegen::Error::RateLimited { retry_after } => {
            GenerationError::Unavailable(format!("rate limited (retry after {retry_after:?})"))
        }
        scenegen::Error::Api { status: 408 | 504, .. } => GenerationError::Timeout {
            after: Duration::ZERO,
        },
        scenegen::Error::Api { status: 503, message } => GenerationError::Unavailable(message),
        scenegen::Error::Api { status, message } => GenerationError::Remote {
            status: Some(status),
            message,
        },
        scenegen::Error::Network(message) => GenerationError::Network(message),
        scenegen::Error::Parse(message) => GenerationError::InvalidResponse(message),
        scenegen::Error::NoApiKey | scenegen::Error::Config(_) => GenerationError::Unavailable(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(map_error(scenegen::Error::Timeout), GenerationError::Timeout { .. }));
        assert!(matches!(
            map_error(scenegen::Error::RateLimited { retry_after: None }),
            GenerationError::Unavailable(_)
        ));
        assert!(matches!(
            map_error(scenegen::Error::Api {
                status: 503,
                message: "maintenance".into()
            }),
            GenerationError::Unavailable(_)
        ));
        assert_eq!(
            map_error(scenegen::Error::Api {
                status: 500,
                message: "boom".into()
            }),
            GenerationError::Remote {
                status: Some(500),
                message: "boom".into()
            }
        );
        assert!(matches!(
            map_error(scenegen::Error::Api {
                status: 504,
                message: "gateway".into()
            }),
            GenerationError::Timeout { .. }
        ));
        assert!(matches!(map_error(scenegen::Error::NoApiKey), GenerationError::Unavailable(_)));
    }
}

//! Minimal client for a remote scene generation service.
//!
//! This crate provides a focused client for a text-to-image HTTP API with:
//! - A single blocking-free `generate` call returning the raw image bytes
//! - Typed status mapping (rate limits, service unavailability, API errors)
//! - A cheap health probe for network-class detection
//!
//! Retry, backoff and circuit breaking are deliberately left to the caller.

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_BASE_URL: &str = "https://api.scenegen.dev/v1";
const DEFAULT_MODEL: &str = "scene-xl";

/// Errors that can occur when using the scene generation client.
#[derive(Debug, Error)]
pub enum Error {
    #[error("API key not configured")]
    NoApiKey,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout
        } else {
            Error::Network(e.to_string())
        }
    }
}

/// Scene generation API client.
#[derive(Clone)]
pub struct SceneGen {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl SceneGen {
    /// Create a new client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
        })
    }

    /// Create a client from the SCENEGEN_API_KEY environment variable.
    ///
    /// SCENEGEN_BASE_URL overrides the endpoint when set.
    pub fn from_env() -> Result<Self, Error> {
        let api_key = std::env::var("SCENEGEN_API_KEY").map_err(|_| Error::NoApiKey)?;
        let client = Self::new(api_key)?;
        Ok(match std::env::var("SCENEGEN_BASE_URL") {
            Ok(url) => client.with_base_url(url),
            Err(_) => client,
        })
    }

    /// Set the default model for this client.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Point the client at a different endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// The endpoint this client talks to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Generate one image and return its bytes and metadata.
    pub async fn generate(&self, request: GenerationRequest) -> Result<GeneratedImage, Error> {
        let api_request = self.build_api_request(&request);
        let headers = self.build_headers()?;

        let mut builder = self
            .client
            .post(format!("{}/images/generations", self.base_url))
            .headers(headers)
            .json(&api_request);
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(Error::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(error_for_status(status, response).await);
        }

        let headers = response.headers().clone();
        let format = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ImageFormat::from_mime)
            .ok_or_else(|| Error::Parse("missing content type".to_string()))?;
        let width = header_u32(&headers, "x-image-width").unwrap_or(request.width);
        let height = header_u32(&headers, "x-image-height").unwrap_or(request.height);
        let server_ms = header_u32(&headers, "x-generation-ms");

        let bytes = response.bytes().await.map_err(Error::from_reqwest)?;
        if bytes.is_empty() {
            return Err(Error::Parse("empty image body".to_string()));
        }

        Ok(GeneratedImage {
            data: bytes.to_vec(),
            format,
            width,
            height,
            server_time: server_ms.map(|ms| Duration::from_millis(u64::from(ms))),
        })
    }

    /// Probe the service health endpoint.
    pub async fn health(&self) -> Result<(), Error> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(Error::from_reqwest)?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(error_for_status(status, response).await)
        }
    }

    fn build_headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .map_err(|e| Error::Config(format!("Invalid API key: {e}")))?,
        );
        Ok(headers)
    }

    fn build_api_request(&self, request: &GenerationRequest) -> ApiRequest {
        ApiRequest {
            model: request.model.clone().unwrap_or_else(|| self.model.clone()),
            prompt: request.prompt.clone(),
            negative_prompt: request.negative_prompt.clone(),
            width: request.width,
            height: request.height,
            steps: request.steps,
            seed: request.seed,
            output_format: request.output_format.extension().to_string(),
        }
    }
}

async fn error_for_status(status: StatusCode, response: reqwest::Response) -> Error {
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs);
        return Error::RateLimited { retry_after };
    }
    if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::GATEWAY_TIMEOUT {
        return Error::Timeout;
    }
    let message = response.text().await.unwrap_or_default();
    Error::Api {
        status: status.as_u16(),
        message,
    }
}

fn header_u32(headers: &HeaderMap, name: &str) -> Option<u32> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
}

// ============================================================================
// Public types
// ============================================================================

/// A generation request to send to the service.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub model: Option<String>,
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub seed: Option<u64>,
    pub output_format: ImageFormat,
    /// Per-request timeout overriding the client default.
    pub timeout: Option<Duration>,
}

impl GenerationRequest {
    /// Create a new request for the given prompt at 1024x1024.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            model: None,
            prompt: prompt.into(),
            negative_prompt: None,
            width: 1024,
            height: 1024,
            steps: 30,
            seed: None,
            output_format: ImageFormat::Webp,
            timeout: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_negative_prompt(mut self, negative: impl Into<String>) -> Self {
        self.negative_prompt = Some(negative.into());
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_steps(mut self, steps: u32) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_format(mut self, format: ImageFormat) -> Self {
        self.output_format = format;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Encodings the service can return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Webp,
    Jpeg,
    Png,
}

impl ImageFormat {
    /// File extension used on the wire.
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Webp => "webp",
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Png => "png",
        }
    }

    /// Parse a MIME content type, defaulting to WebP for unknown types.
    pub fn from_mime(mime: &str) -> Self {
        match mime.split(';').next().map(str::trim) {
            Some("image/jpeg") | Some("image/jpg") => ImageFormat::Jpeg,
            Some("image/png") => ImageFormat::Png,
            _ => ImageFormat::Webp,
        }
    }
}

/// An image returned by the service.
#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub data: Vec<u8>,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    /// Server-side generation time, when reported.
    pub server_time: Option<Duration>,
}

impl GeneratedImage {
    /// Ratio of raw RGBA size to encoded size.
    pub fn compression_ratio(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        let raw = u64::from(self.width) * u64::from(self.height) * 4;
        raw as f32 / self.data.len() as f32
    }
}

// ============================================================================
// Internal API types
// ============================================================================

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    negative_prompt: Option<String>,
    width: u32,
    height: u32,
    steps: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
    output_format: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = SceneGen::new("test-key").unwrap();
        assert_eq!(client.model, DEFAULT_MODEL);
        assert_eq!(client.base_url(), DEFAULT_BASE_URL);
    }

    #[test]
    fn test_client_with_base_url_trims_slash() {
        let client = SceneGen::new("test-key")
            .unwrap()
            .with_base_url("http://localhost:8080/v1/");
        assert_eq!(client.base_url(), "http://localhost:8080/v1");
    }

    #[test]
    fn test_request_builder() {
        let request = GenerationRequest::new("a misty harbor at dawn")
            .with_negative_prompt("text, watermark")
            .with_size(768, 432)
            .with_steps(12)
            .with_seed(7);

        assert_eq!(request.width, 768);
        assert_eq!(request.height, 432);
        assert_eq!(request.steps, 12);
        assert_eq!(request.seed, Some(7));
        assert!(request.negative_prompt.is_some());
    }

    #[test]
    fn test_api_request_uses_client_model_by_default() {
        let client = SceneGen::new("k").unwrap().with_model("scene-lite");
        let api = client.build_api_request(&GenerationRequest::new("x"));
        assert_eq!(api.model, "scene-lite");
        assert_eq!(api.output_format, "webp");

        let json = serde_json::to_value(&api).unwrap();
        assert!(json.get("seed").is_none());
        assert!(json.get("negative_prompt").is_none());
    }

    #[test]
    fn test_image_format_from_mime() {
        assert_eq!(ImageFormat::from_mime("image/png"), ImageFormat::Png);
        assert_eq!(ImageFormat::from_mime("image/jpeg; q=0.9"), ImageFormat::Jpeg);
        assert_eq!(ImageFormat::from_mime("image/webp"), ImageFormat::Webp);
        assert_eq!(ImageFormat::from_mime("application/octet-stream"), ImageFormat::Webp);
    }

    #[test]
    fn test_compression_ratio() {
        let image = GeneratedImage {
            data: vec![0; 1000],
            format: ImageFormat::Webp,
            width: 50,
            height: 20,
            server_time: None,
        };
        assert!((image.compression_ratio() - 4.0).abs() < f32::EPSILON);
    }
}

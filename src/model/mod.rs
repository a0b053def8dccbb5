pub mod gemini;
pub mod mock;
pub mod retry;
pub mod translate;

use futures::stream::BoxStream;
use log::info;

use crate::config::{RelayConfig, RelayMode};
use crate::error::UpstreamError;
use gemini::{Content, GeminiClient};
use mock::MockBackend;

/// Incremental text fragments of a streamed generation.
pub type FragmentStream = BoxStream<'static, Result<String, UpstreamError>>;

/// A validated request in upstream terms.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamRequest {
    pub model: String,
    pub turns: Vec<Content>,
    pub system_instruction: Option<String>,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

/// Result of a non-streaming call. `text` is `None` when the upstream gave
/// nothing readable back, e.g. after safety filtering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Generation {
    pub text: Option<String>,
    pub finish_reason: Option<String>,
    pub block_reason: Option<String>,
    pub safety: Vec<String>,
}

// Either a connection to the upstream API or the canned mock
#[derive(Debug, Clone)]
pub enum Backend {
    Gemini(GeminiClient),
    Mock(MockBackend),
}

impl Backend {
    pub fn from_config(config: &RelayConfig) -> reqwest::Result<Self> {
        match &config.mode {
            RelayMode::Live { api_key } => {
                info!(
                    "Using upstream at {} (default model: {})",
                    config.base_url, config.model
                );
                let client = GeminiClient::new(
                    api_key.clone(),
                    config.base_url.clone(),
                    config.retry_schedule.clone(),
                    config.upstream_timeout,
                )?;
                Ok(Backend::Gemini(client))
            }
            RelayMode::Mock => {
                info!("Running in mock mode, the upstream API will not be called");
                Ok(Backend::Mock(MockBackend))
            }
        }
    }

    pub fn is_mock(&self) -> bool {
        matches!(self, Backend::Mock(_))
    }

    pub async fn generate(&self, request: &UpstreamRequest) -> Result<Generation, UpstreamError> {
        match self {
            Backend::Gemini(client) => client.generate(request).await,
            Backend::Mock(mock) => mock.generate(request).await,
        }
    }

    pub async fn stream(&self, request: &UpstreamRequest) -> Result<FragmentStream, UpstreamError> {
        match self {
            Backend::Gemini(client) => client.stream(request).await,
            Backend::Mock(mock) => mock.stream(request).await,
        }
    }
}

use futures::stream::{self, StreamExt};
use log::info;

use crate::error::UpstreamError;
use crate::model::{FragmentStream, Generation, UpstreamRequest};

pub const MOCK_REPLY: &str =
    "[MOCK] This is a mock response. Your request was received successfully.";
pub const MOCK_PDF_REPLY: &str = "[MOCK] PDF uploaded successfully.";

/// Backend that never leaves the process.
#[derive(Debug, Clone, Default)]
pub struct MockBackend;

impl MockBackend {
    pub async fn generate(&self, request: &UpstreamRequest) -> Result<Generation, UpstreamError> {
        info!("MOCK: answering {} turn(s)", request.turns.len());
        Ok(Generation {
            text: Some(MOCK_REPLY.to_string()),
            finish_reason: Some("STOP".to_string()),
            ..Default::default()
        })
    }

    pub async fn stream(&self, request: &UpstreamRequest) -> Result<FragmentStream, UpstreamError> {
        info!("MOCK: streaming reply to {} turn(s)", request.turns.len());
        let words: Vec<Result<String, UpstreamError>> = MOCK_REPLY
            .split_inclusive(' ')
            .map(|word| Ok(word.to_string()))
            .collect();
        Ok(stream::iter(words).boxed())
    }
}

//! Wire types and HTTP client for the Gemini `generateContent` REST API.

use std::fmt;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use eventsource_stream::{EventStreamError, Eventsource};
use futures::future;
use futures::stream::{BoxStream, StreamExt};
use log::{debug, info, warn};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::error::UpstreamError;
use crate::model::retry::with_backoff;
use crate::model::{FragmentStream, Generation, UpstreamRequest};

const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpstreamRole {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    /// Base64 encoded bytes.
    pub data: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn inline(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            inline_data: Some(Blob {
                mime_type: mime_type.into(),
                data: STANDARD.encode(bytes),
            }),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<UpstreamRole>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn turn(role: UpstreamRole, parts: Vec<Part>) -> Self {
        Self {
            role: Some(role),
            parts,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest<'a> {
    pub contents: &'a [Content],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    pub generation_config: GenerationConfig,
}

impl<'a> From<&'a UpstreamRequest> for GenerateContentRequest<'a> {
    fn from(request: &'a UpstreamRequest) -> Self {
        Self {
            contents: &request.turns,
            system_instruction: request.system_instruction.as_ref().map(|text| Content {
                role: None,
                parts: vec![Part::text(text.clone())],
            }),
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_output_tokens,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SafetyRating {
    pub category: String,
    pub probability: String,
    #[serde(default)]
    pub blocked: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub content: Option<Content>,
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub safety_ratings: Vec<SafetyRating>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    pub block_reason: Option<String>,
    #[serde(default)]
    pub safety_ratings: Vec<SafetyRating>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    pub prompt_feedback: Option<PromptFeedback>,
    /// Set when the upstream reports a failure inside an event stream.
    pub error: Option<ErrorBody>,
}

impl GenerateContentResponse {
    /// Concatenated text parts of the first candidate, if there are any.
    pub fn text(&self) -> Option<String> {
        let text: String = self
            .candidates
            .first()?
            .content
            .as_ref()?
            .parts
            .iter()
            .filter_map(|part| part.text.as_deref())
            .collect();

        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    pub fn into_generation(self) -> Generation {
        let text = self.text();
        let candidate = self.candidates.into_iter().next();
        let feedback = self.prompt_feedback;

        let safety = candidate
            .iter()
            .flat_map(|c| c.safety_ratings.iter())
            .chain(feedback.iter().flat_map(|f| f.safety_ratings.iter()))
            .filter(|rating| rating.blocked || rating.probability != "NEGLIGIBLE")
            .map(|rating| format!("{}={}", rating.category, rating.probability))
            .collect();

        Generation {
            text,
            finish_reason: candidate.and_then(|c| c.finish_reason),
            block_reason: feedback.and_then(|f| f.block_reason),
            safety,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorBody {
    pub code: Option<u16>,
    pub message: Option<String>,
    pub status: Option<String>,
}

impl ErrorBody {
    fn into_error(self, status: u16, fallback_message: impl FnOnce() -> String) -> UpstreamError {
        let message = self.message.unwrap_or_else(fallback_message);
        match (status, self.status.as_deref().unwrap_or_default()) {
            (429, _) | (_, "RESOURCE_EXHAUSTED") => UpstreamError::RateLimited(message),
            (504, _) | (_, "DEADLINE_EXCEEDED") => UpstreamError::DeadlineExceeded(message),
            (_, "INVALID_ARGUMENT") | (400, "") => UpstreamError::InvalidArgument(message),
            (code, _) => UpstreamError::Api {
                status: code,
                message,
            },
        }
    }
}

/// Classifies a non-success upstream reply into an [`UpstreamError`].
pub fn classify(status: StatusCode, body: &str) -> UpstreamError {
    let parsed = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| e.error)
        .unwrap_or_default();
    parsed.into_error(status.as_u16(), || body.chars().take(200).collect())
}

#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    base_url: String,
    api_key: String,
    retry_schedule: Vec<Duration>,
}

impl fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiClient")
            .field("base_url", &self.base_url)
            .field("retry_schedule", &self.retry_schedule)
            .finish_non_exhaustive()
    }
}

impl GeminiClient {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        retry_schedule: Vec<Duration>,
        timeout: Option<Duration>,
    ) -> reqwest::Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            base_url: base_url.into(),
            api_key: api_key.into(),
            retry_schedule,
        })
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!("{}/models/{}:{}", self.base_url, model, method)
    }

    async fn post(
        &self,
        url: &str,
        body: &GenerateContentRequest<'_>,
    ) -> Result<Response, UpstreamError> {
        let response = self
            .client
            .post(url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let error_text = response.text().await.unwrap_or_default();
        Err(classify(status, &error_text))
    }

    pub async fn generate(&self, request: &UpstreamRequest) -> Result<Generation, UpstreamError> {
        let url = self.endpoint(&request.model, "generateContent");
        let body = GenerateContentRequest::from(request);
        info!(
            "Sending {} turn(s) to {} (max_output_tokens: {})",
            request.turns.len(),
            request.model,
            request.max_output_tokens
        );

        let (url, body) = (&url, &body);
        let parsed = with_backoff(&self.retry_schedule, move |_| async move {
            let response = self.post(url, body).await?;
            Ok::<_, UpstreamError>(response.json::<GenerateContentResponse>().await?)
        })
        .await?;

        debug!("Upstream response: {:?}", parsed);
        Ok(parsed.into_generation())
    }

    pub async fn stream(&self, request: &UpstreamRequest) -> Result<FragmentStream, UpstreamError> {
        let url = format!(
            "{}?alt=sse",
            self.endpoint(&request.model, "streamGenerateContent")
        );
        let body = GenerateContentRequest::from(request);
        info!(
            "Opening stream for {} turn(s) to {}",
            request.turns.len(),
            request.model
        );

        let (url, body) = (&url, &body);
        let response = with_backoff(&self.retry_schedule, move |_| self.post(url, body)).await?;

        Ok(sse_fragments(response.bytes_stream().boxed()))
    }
}

/// Maps one stream event onto a fragment. Events without text yield `None`.
fn event_fragment(data: &str) -> Option<Result<String, UpstreamError>> {
    let mut event = match serde_json::from_str::<GenerateContentResponse>(data) {
        Ok(event) => event,
        Err(e) => return Some(Err(e.into())),
    };

    if let Some(error) = event.error.take() {
        let status = error.code.unwrap_or(500);
        return Some(Err(error.into_error(status, || "stream failed".to_string())));
    }
    if let Some(text) = event.text() {
        return Some(Ok(text));
    }

    let generation = event.into_generation();
    if generation.block_reason.is_some() || !generation.safety.is_empty() {
        warn!(
            "Stream event blocked (finish_reason: {:?}, block_reason: {:?}, safety: {:?})",
            generation.finish_reason, generation.block_reason, generation.safety
        );
    } else {
        debug!("Stream event without text (finish_reason: {:?})", generation.finish_reason);
    }
    None
}

/// Turns an SSE body into the text fragments it carries. The stream ends after
/// the first error.
fn sse_fragments(body: BoxStream<'static, reqwest::Result<Bytes>>) -> FragmentStream {
    body.eventsource()
        .filter_map(|event| {
            future::ready(match event {
                Ok(event) => event_fragment(&event.data),
                Err(EventStreamError::Transport(e)) => Some(Err(UpstreamError::from(e))),
                Err(e) => Some(Err(UpstreamError::Stream(e.to_string()))),
            })
        })
        .scan(false, |failed, fragment| {
            if *failed {
                return future::ready(None);
            }
            *failed = fragment.is_err();
            future::ready(Some(fragment))
        })
        .boxed()
}

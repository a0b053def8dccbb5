//! Client side of the relay: an explicit conversation plus an HTTP client
//! that resends it on every call.

use std::time::Duration;

use futures::future;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use log::{debug, info};
use reqwest::{header, multipart, Client, RequestBuilder, StatusCode};
use thiserror::Error;

use crate::web::models::{ChatRequest, Envelope, Message, Role};
use crate::web::payload::{FILE_FIELD, PAYLOAD_FIELD};

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8002";
pub const TEXT_TIMEOUT: Duration = Duration::from_secs(30);
pub const IMAGE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Request timed out. Please try again.")]
    Timeout,

    #[error("Error {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("Connection error: {0}")]
    Transport(reqwest::Error),

    #[error("Failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else {
            ClientError::Transport(err)
        }
    }
}

/// The full history of one chat, owned by the caller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system(instruction: impl Into<String>) -> Self {
        let mut conversation = Self::new();
        conversation.push(Role::System, instruction);
        conversation
    }

    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        self.messages.push(Message::new(role, content));
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.push(Role::User, content);
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.push(Role::Assistant, content);
    }

    /// Drops the turn history but keeps system instructions.
    pub fn clear(&mut self) {
        self.messages.retain(|m| m.role == Role::System);
    }

    /// Removes the last message if it is an unanswered user turn.
    pub fn pop_last_user(&mut self) -> Option<Message> {
        match self.messages.last() {
            Some(message) if message.role == Role::User => self.messages.pop(),
            _ => None,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Identity the fronting proxy handed to the UI process. Forwarded verbatim;
/// the relay itself never reads it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ForwardedIdentity {
    pub cookie: Option<String>,
}

impl ForwardedIdentity {
    pub fn from_cookie(cookie: Option<String>) -> Self {
        Self {
            cookie: cookie.filter(|c| !c.trim().is_empty()),
        }
    }

    /// Takes the `Cookie` header from an inbound request's headers.
    pub fn from_headers(headers: &header::HeaderMap) -> Self {
        Self::from_cookie(
            headers
                .get(header::COOKIE)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string),
        )
    }

    fn apply(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.cookie {
            Some(cookie) => builder.header(header::COOKIE, cookie),
            None => builder,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub media_type: String,
    pub data: Vec<u8>,
}

/// Per-call generation settings.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    pub model: Option<String>,
}

pub type TextStream = BoxStream<'static, Result<String, ClientError>>;

#[derive(Debug, Clone)]
pub struct RelayClient {
    base_url: String,
    client: Client,
    identity: ForwardedIdentity,
}

impl RelayClient {
    pub fn new(base_url: impl Into<String>, identity: ForwardedIdentity) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: Client::new(),
            identity,
        }
    }

    fn chat_url(&self) -> String {
        format!("{}/chat", self.base_url)
    }

    fn request(&self, conversation: &Conversation, options: &SendOptions, stream: bool) -> ChatRequest {
        let mut request = ChatRequest::new(conversation.messages().to_vec());
        if let Some(temperature) = options.temperature {
            request.temperature = temperature;
        }
        request.max_output_tokens = options.max_output_tokens;
        request.model = options.model.clone();
        request.stream = stream;
        request
    }

    /// Sends the conversation and returns the assistant's reply.
    pub async fn send(
        &self,
        conversation: &Conversation,
        options: &SendOptions,
    ) -> Result<String, ClientError> {
        let body = self.request(conversation, options, false);
        debug!("Sending {} message(s) to {}", body.messages.len(), self.chat_url());

        let builder = self
            .client
            .post(self.chat_url())
            .json(&body)
            .timeout(TEXT_TIMEOUT);
        self.envelope(self.identity.apply(builder)).await
    }

    /// Sends the conversation with one attached image.
    pub async fn send_with_image(
        &self,
        conversation: &Conversation,
        image: ImageUpload,
        options: &SendOptions,
    ) -> Result<String, ClientError> {
        let body = self.request(conversation, options, false);
        let payload = serde_json::to_string(&body)?;

        let file = multipart::Part::bytes(image.data)
            .file_name(image.file_name)
            .mime_str(&image.media_type)?;
        let form = multipart::Form::new()
            .text(PAYLOAD_FIELD, payload)
            .part(FILE_FIELD, file);

        let builder = self
            .client
            .post(self.chat_url())
            .multipart(form)
            .timeout(IMAGE_TIMEOUT);
        self.envelope(self.identity.apply(builder)).await
    }

    /// Streams the reply as it is generated.
    pub async fn stream(
        &self,
        conversation: &Conversation,
        options: &SendOptions,
    ) -> Result<TextStream, ClientError> {
        let body = self.request(conversation, options, true);
        let builder = self.client.post(self.chat_url()).json(&body);
        let response = self.identity.apply(builder).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status { status, body });
        }

        Ok(response
            .bytes_stream()
            .map_err(ClientError::from)
            .scan(Vec::new(), |carry, chunk| {
                future::ready(Some(chunk.map(|bytes| take_utf8(carry, &bytes))))
            })
            .boxed())
    }

    async fn envelope(&self, builder: RequestBuilder) -> Result<String, ClientError> {
        let response = builder.send().await?;
        let status = response.status();

        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            info!("Relay answered {}", status);
            return Err(ClientError::Status { status, body });
        }

        let envelope: Envelope = response.json().await?;
        Ok(envelope.message)
    }
}

/// Appends `bytes` and returns the longest complete UTF-8 prefix, keeping a
/// split trailing character for the next chunk.
fn take_utf8(carry: &mut Vec<u8>, bytes: &[u8]) -> String {
    carry.extend_from_slice(bytes);
    let complete = match std::str::from_utf8(carry) {
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        _ => carry.len(),
    };
    let rest = carry.split_off(complete);
    let text = String::from_utf8_lossy(carry).into_owned();
    *carry = rest;
    text
}

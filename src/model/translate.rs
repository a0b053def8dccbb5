//! Maps relay chat payloads onto the upstream content format.

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::model::gemini::{Content, Part, UpstreamRole};
use crate::model::UpstreamRequest;
use crate::web::models::{ChatRequest, ImageAttachment, Message, Role};

pub const IMAGE_FALLBACK_PROMPT: &str = "What's in this image?";

#[derive(Debug, Clone, PartialEq)]
pub struct Translated {
    pub turns: Vec<Content>,
    pub system_instruction: Option<String>,
}

/// Splits system messages out of the turn history and maps the remaining roles.
pub fn translate(messages: &[Message], max_input_chars: usize) -> Translated {
    let mut turns = Vec::with_capacity(messages.len());
    let mut system = Vec::new();

    for message in messages {
        match message.role {
            Role::System => system.push(message.content.as_str()),
            Role::User => turns.push(Content::turn(
                UpstreamRole::User,
                vec![Part::text(cap_input(&message.content, max_input_chars))],
            )),
            Role::Assistant => turns.push(Content::turn(
                UpstreamRole::Model,
                vec![Part::text(message.content.clone())],
            )),
        }
    }

    Translated {
        turns,
        system_instruction: if system.is_empty() {
            None
        } else {
            Some(system.join("\n"))
        },
    }
}

/// Truncates to `max_chars` characters. Zero disables the cap.
pub fn cap_input(content: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return content.to_string();
    }
    match content.char_indices().nth(max_chars) {
        Some((cut, _)) => content[..cut].to_string(),
        None => content.to_string(),
    }
}

/// Builds the single image-plus-text turn sent when a file is attached.
pub fn assemble_image_turn(
    messages: &[Message],
    image: &ImageAttachment,
    max_input_chars: usize,
) -> Content {
    let prompt = messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| cap_input(&m.content, max_input_chars))
        .filter(|text| !text.trim().is_empty())
        .unwrap_or_else(|| IMAGE_FALLBACK_PROMPT.to_string());

    Content::turn(
        UpstreamRole::User,
        vec![Part::inline(&image.media_type, &image.data), Part::text(prompt)],
    )
}

fn is_valid_model_name(model: &str) -> bool {
    !model.is_empty()
        && model
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}

/// Validates a chat request and resolves it into what the upstream call needs.
pub fn build(
    request: &ChatRequest,
    image: Option<&ImageAttachment>,
    config: &RelayConfig,
) -> Result<UpstreamRequest, RelayError> {
    let model = match &request.model {
        Some(model) if !is_valid_model_name(model) => {
            return Err(RelayError::InvalidRequest(format!(
                "model name {model:?} contains unsupported characters"
            )))
        }
        Some(model) => model.clone(),
        None => config.model.clone(),
    };

    let Translated {
        turns,
        system_instruction,
    } = translate(&request.messages, config.max_input_chars);

    let turns = match image {
        Some(image) => vec![assemble_image_turn(
            &request.messages,
            image,
            config.max_input_chars,
        )],
        None if turns.is_empty() => {
            return Err(RelayError::InvalidRequest(
                "messages must contain at least one user or assistant message".to_string(),
            ))
        }
        None => turns,
    };

    Ok(UpstreamRequest {
        model,
        turns,
        system_instruction,
        temperature: request.temperature,
        max_output_tokens: request.max_output_tokens.unwrap_or(config.max_output_tokens),
    })
}

//! Reads `/chat` bodies: plain JSON, or multipart with a `payload` field and an optional `file`.

use actix_multipart::Multipart;
use actix_web::{http::header, web, HttpRequest};
use futures::StreamExt;
use log::debug;

use crate::error::RelayError;
use crate::web::models::{ChatRequest, ImageAttachment};

pub const PAYLOAD_FIELD: &str = "payload";
pub const FILE_FIELD: &str = "file";

#[derive(Debug)]
pub struct ChatPayload {
    pub request: ChatRequest,
    pub image: Option<ImageAttachment>,
}

fn is_multipart(req: &HttpRequest) -> bool {
    req.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim_start().to_ascii_lowercase().starts_with("multipart/form-data"))
        .unwrap_or(false)
}

pub fn parse_request(body: &[u8]) -> Result<ChatRequest, RelayError> {
    serde_json::from_slice(body)
        .map_err(|e| RelayError::InvalidRequest(format!("malformed chat request: {e}")))
}

pub async fn read_chat_payload(
    req: &HttpRequest,
    payload: web::Payload,
    max_json_bytes: usize,
    max_upload_bytes: usize,
) -> Result<ChatPayload, RelayError> {
    if is_multipart(req) {
        read_multipart(req, payload, max_upload_bytes).await
    } else {
        let body = read_body(payload, max_json_bytes).await?;
        Ok(ChatPayload {
            request: parse_request(&body)?,
            image: None,
        })
    }
}

async fn read_body(mut payload: web::Payload, limit: usize) -> Result<web::BytesMut, RelayError> {
    let mut body = web::BytesMut::new();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk
            .map_err(|e| RelayError::InvalidRequest(format!("failed to read request body: {e}")))?;
        if body.len() + chunk.len() > limit {
            return Err(RelayError::PayloadTooLarge(limit));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

async fn read_multipart(
    req: &HttpRequest,
    payload: web::Payload,
    limit: usize,
) -> Result<ChatPayload, RelayError> {
    let mut multipart = Multipart::new(req.headers(), payload);
    let mut request = None;
    let mut image = None;
    let mut total = 0usize;

    while let Some(field) = multipart.next().await {
        let mut field = field.map_err(|e| RelayError::InvalidRequest(e.to_string()))?;
        let name = field
            .content_disposition()
            .get_name()
            .unwrap_or_default()
            .to_string();
        let file_name = field
            .content_disposition()
            .get_filename()
            .map(str::to_string);
        let declared_type = field.content_type().map(|m| m.essence_str().to_string());

        let mut data = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|e| RelayError::InvalidRequest(e.to_string()))?;
            total += chunk.len();
            if total > limit {
                return Err(RelayError::PayloadTooLarge(limit));
            }
            data.extend_from_slice(&chunk);
        }

        match name.as_str() {
            PAYLOAD_FIELD => request = Some(parse_request(&data)?),
            FILE_FIELD if data.is_empty() => debug!("Ignoring empty file part"),
            FILE_FIELD => {
                let media_type = resolve_media_type(declared_type.as_deref(), file_name.as_deref())?;
                image = Some(ImageAttachment {
                    media_type,
                    data,
                    file_name,
                });
            }
            other => debug!("Ignoring unknown form field {:?}", other),
        }
    }

    let request = request.ok_or_else(|| {
        RelayError::InvalidRequest(format!("multipart body is missing the `{PAYLOAD_FIELD}` field"))
    })?;
    Ok(ChatPayload { request, image })
}

/// Picks the image media type from the part header, or from the file extension
/// when the header is absent or generic.
pub fn resolve_media_type(
    declared: Option<&str>,
    file_name: Option<&str>,
) -> Result<String, RelayError> {
    match declared {
        Some(media_type) if media_type.starts_with("image/") => return Ok(media_type.to_string()),
        None | Some("application/octet-stream") => {}
        Some(other) => {
            return Err(RelayError::InvalidRequest(format!(
                "unsupported attachment type {other}"
            )))
        }
    }

    let extension = file_name
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());

    match extension.as_deref() {
        Some("png") => Ok("image/png".to_string()),
        Some("jpg") | Some("jpeg") => Ok("image/jpeg".to_string()),
        Some("webp") => Ok("image/webp".to_string()),
        Some("gif") => Ok("image/gif".to_string()),
        Some("heic") => Ok("image/heic".to_string()),
        Some("heif") => Ok("image/heif".to_string()),
        _ => Err(RelayError::InvalidRequest(
            "could not determine the attachment's image type".to_string(),
        )),
    }
}

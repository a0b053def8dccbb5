use actix_web::{web, HttpRequest, HttpResponse, Responder};
use futures::StreamExt;
use log::{error, info, warn};
use serde_json::json;
use tera::Context;
use uuid::Uuid;

use crate::error::RelayError;
use crate::model::mock::MOCK_PDF_REPLY;
use crate::model::translate;
use crate::web::models::Envelope;
use crate::web::payload::{read_chat_payload, ChatPayload};
use crate::web::stream;
use crate::AppState;

/// Returned when the upstream result carries no readable text.
pub const FALLBACK_APOLOGY: &str =
    "I'm sorry, but I couldn't generate a response to that request.";

// Index page handler
pub async fn index(data: web::Data<AppState>) -> Result<HttpResponse, RelayError> {
    let mut context = Context::new();
    context.insert("model", &data.config.model);
    context.insert("mock", &data.backend.is_mock());
    match data.tera.render("index.html", &context) {
        Ok(html) => Ok(HttpResponse::Ok().content_type("text/html").body(html)),
        Err(e) => {
            error!("Template error: {}", e);
            Err(RelayError::Internal(e.to_string()))
        }
    }
}

// Liveness probe
pub async fn healthz() -> impl Responder {
    HttpResponse::Ok().json(json!({ "status": "healthy" }))
}

// Chat API endpoint
pub async fn chat(
    req: HttpRequest,
    payload: web::Payload,
    data: web::Data<AppState>,
) -> Result<HttpResponse, RelayError> {
    let request_id = Uuid::new_v4();
    let config = &data.config;

    let ChatPayload { request, image } =
        read_chat_payload(&req, payload, config.max_json_bytes, config.max_upload_bytes)
            .await
            .map_err(|e| {
                warn!("[{}] Rejected chat request: {}", request_id, e);
                e
            })?;

    info!(
        "[{}] Chat request: {} message(s), stream: {}, image: {}",
        request_id,
        request.messages.len(),
        request.stream,
        image.as_ref().map(|i| i.media_type.as_str()).unwrap_or("none")
    );

    if request.stream && image.is_some() {
        warn!("[{}] Streaming with an image attachment is not supported", request_id);
        return Err(RelayError::InvalidRequest(
            "streaming is not supported together with an image attachment".to_string(),
        ));
    }

    let upstream = translate::build(&request, image.as_ref(), config)?;

    if request.stream {
        let fragments = data.backend.stream(&upstream).await.map_err(|e| {
            error!("[{}] Failed to open upstream stream: {}", request_id, e);
            RelayError::from(e)
        })?;
        return Ok(stream::respond(fragments, request_id));
    }

    let generation = data.backend.generate(&upstream).await.map_err(|e| {
        error!("[{}] Upstream call failed: {}", request_id, e);
        RelayError::from(e)
    })?;

    let message = match generation.text {
        Some(text) => {
            info!("[{}] Response length: {} characters", request_id, text.chars().count());
            text
        }
        None => {
            warn!(
                "[{}] No text in upstream result (finish_reason: {:?}, block_reason: {:?}, safety: {:?})",
                request_id, generation.finish_reason, generation.block_reason, generation.safety
            );
            FALLBACK_APOLOGY.to_string()
        }
    };

    Ok(HttpResponse::Ok().json(Envelope::ok(message)))
}

// Mock-only PDF upload acknowledgement
pub async fn upload_pdf(
    mut payload: web::Payload,
    data: web::Data<AppState>,
) -> Result<HttpResponse, RelayError> {
    if !data.backend.is_mock() {
        return Err(RelayError::NotAvailable("/upload_pdf"));
    }

    let mut received = 0usize;
    while let Some(chunk) = payload.next().await {
        let chunk = chunk.map_err(|e| RelayError::InvalidRequest(e.to_string()))?;
        received += chunk.len();
        if received > data.config.max_upload_bytes {
            return Err(RelayError::PayloadTooLarge(data.config.max_upload_bytes));
        }
    }

    info!("MOCK: Upload PDF endpoint called ({} bytes)", received);
    Ok(HttpResponse::Ok().json(Envelope::ok(MOCK_PDF_REPLY)))
}

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use actix_web::{web, web::Bytes, App, HttpRequest, HttpResponse, HttpServer};
use futures::stream;
use serde_json::Value;

use gemini_relay::config::{RelayConfig, RelayMode};
use gemini_relay::model::gemini::GeminiClient;
use gemini_relay::model::Backend;
use gemini_relay::AppState;

pub const TEST_KEY: &str = "test-key";
pub const BOUNDARY: &str = "relay-test-boundary";

/// One scripted reply of the fake upstream.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
    /// Headers go out at once, the body only after this delay.
    pub body_delay: Option<Duration>,
}

impl Reply {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: body.to_string(),
            body_delay: None,
        }
    }

    pub fn text(text: &str) -> Self {
        Self::json(
            200,
            serde_json::json!({
                "candidates": [{
                    "content": {"role": "model", "parts": [{"text": text}]},
                    "finishReason": "STOP"
                }]
            }),
        )
    }

    pub fn error(status: u16, kind: &str) -> Self {
        Self::json(
            status,
            serde_json::json!({"error": {"code": status, "message": format!("{kind} from fake"), "status": kind}}),
        )
    }

    pub fn sse(events: &[&str]) -> Self {
        Self {
            status: 200,
            content_type: "text/event-stream",
            body: events
                .iter()
                .map(|event| format!("data: {event}\r\n\r\n"))
                .collect(),
            body_delay: None,
        }
    }

    pub fn stalled(self, delay: Duration) -> Self {
        Self {
            body_delay: Some(delay),
            ..self
        }
    }
}

/// Records what the relay sent and answers from a script.
pub struct FakeUpstream {
    hits: AtomicUsize,
    calls: Mutex<Vec<(String, Value)>>,
    keys: Mutex<Vec<String>>,
    script: Mutex<VecDeque<Reply>>,
    fallback: Reply,
}

impl FakeUpstream {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn last_body(&self) -> Value {
        self.calls
            .lock()
            .unwrap()
            .last()
            .map(|(_, body)| body.clone())
            .expect("no upstream call recorded")
    }

    pub fn last_call(&self) -> String {
        self.calls
            .lock()
            .unwrap()
            .last()
            .map(|(call, _)| call.clone())
            .expect("no upstream call recorded")
    }

    pub fn keys(&self) -> Vec<String> {
        self.keys.lock().unwrap().clone()
    }
}

async fn upstream_handler(
    call: web::Path<String>,
    req: HttpRequest,
    body: web::Json<Value>,
    state: web::Data<FakeUpstream>,
) -> HttpResponse {
    state.hits.fetch_add(1, Ordering::SeqCst);
    if let Some(key) = req.headers().get("x-goog-api-key").and_then(|v| v.to_str().ok()) {
        state.keys.lock().unwrap().push(key.to_string());
    }
    state
        .calls
        .lock()
        .unwrap()
        .push((call.into_inner(), body.into_inner()));

    let reply = state
        .script
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| state.fallback.clone());

    let mut response =
        HttpResponse::build(actix_web::http::StatusCode::from_u16(reply.status).unwrap());
    response.content_type(reply.content_type);

    match reply.body_delay {
        Some(delay) => response.streaming(stream::once(async move {
            tokio::time::sleep(delay).await;
            Ok::<_, actix_web::Error>(Bytes::from(reply.body))
        })),
        None => response.body(reply.body),
    }
}

/// Starts the fake upstream on an ephemeral port and returns its base URL.
pub async fn spawn_upstream(script: Vec<Reply>, fallback: Reply) -> (String, web::Data<FakeUpstream>) {
    let state = web::Data::new(FakeUpstream {
        hits: AtomicUsize::new(0),
        calls: Mutex::new(Vec::new()),
        keys: Mutex::new(Vec::new()),
        script: Mutex::new(script.into()),
        fallback,
    });

    let data = state.clone();
    let server = HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .route("/v1beta/models/{call}", web::post().to(upstream_handler))
    })
    .workers(1)
    .bind(("127.0.0.1", 0))
    .unwrap();

    let addr = server.addrs()[0];
    actix_web::rt::spawn(server.run());

    (format!("http://{addr}/v1beta"), state)
}

pub fn mock_state(config: RelayConfig) -> AppState {
    AppState::new(RelayConfig {
        mode: RelayMode::Mock,
        ..config
    })
    .unwrap()
}

pub fn live_state(base_url: &str, config: RelayConfig) -> AppState {
    let config = RelayConfig {
        mode: RelayMode::Live {
            api_key: TEST_KEY.to_string(),
        },
        model: "gemini-test".to_string(),
        base_url: base_url.to_string(),
        retry_schedule: vec![Duration::from_millis(1), Duration::from_millis(1)],
        ..config
    };
    let client = GeminiClient::new(
        TEST_KEY,
        config.base_url.clone(),
        config.retry_schedule.clone(),
        config.upstream_timeout.or(Some(Duration::from_secs(10))),
    )
    .unwrap();
    AppState::with_backend(config, Backend::Gemini(client)).unwrap()
}

/// Builds a multipart body with a `payload` field and an optional image part.
pub fn multipart_body(payload: &Value, image: Option<(&str, &str, &[u8])>) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"payload\"\r\n\r\n{payload}\r\n"
        )
        .as_bytes(),
    );
    if let Some((file_name, content_type, data)) = image {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn multipart_content_type() -> String {
    format!("multipart/form-data; boundary={BOUNDARY}")
}

mod support;

use actix_web::http::{header, StatusCode};
use actix_web::{test, web, App};
use serde_json::json;

use gemini_relay::config::RelayConfig;
use gemini_relay::model::mock::{MOCK_PDF_REPLY, MOCK_REPLY};
use gemini_relay::web::models::Envelope;
use gemini_relay::web::routes;

use support::{mock_state, multipart_body, multipart_content_type};

macro_rules! mock_app {
    ($config:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new(mock_state($config)))
                .configure(routes::configure),
        )
        .await
    };
}

#[actix_web::test]
async fn healthz_answers_get_and_post() {
    let app = mock_app!(RelayConfig::default());

    for req in [
        test::TestRequest::get().uri("/healthz").to_request(),
        test::TestRequest::post().uri("/healthz").to_request(),
    ] {
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body, json!({"status": "healthy"}));
    }
}

#[actix_web::test]
async fn index_renders_the_chat_page() {
    let app = mock_app!(RelayConfig::default());

    let resp = test::call_service(&app, test::TestRequest::get().uri("/").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let html = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
    assert!(html.contains("Chatbot"));
    assert!(html.contains("mock mode"));
}

#[actix_web::test]
async fn chat_returns_the_envelope() {
    let app = mock_app!(RelayConfig::default());

    let req = test::TestRequest::post()
        .uri("/chat")
        .set_json(json!({"messages": [{"role": "user", "content": "hello"}], "stream": false}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let envelope: Envelope = test::read_body_json(resp).await;
    assert_eq!(envelope, Envelope::ok(MOCK_REPLY));
}

#[actix_web::test]
async fn invalid_requests_get_400_envelopes() {
    let app = mock_app!(RelayConfig::default());

    let bodies = [
        r#"{"messages":[{"role":"bogus","content":"hello"}]}"#,
        r#"{"messages":[{"role":"user"}]}"#,
        r#"{"messages": "#,
        r#"{"messages":[]}"#,
        r#"{"messages":[{"role":"user","content":"hi"}],"model":"a/b"}"#,
    ];

    for body in bodies {
        let req = test::TestRequest::post()
            .uri("/chat")
            .insert_header((header::CONTENT_TYPE, "application/json"))
            .set_payload(body)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{body}");

        let envelope: Envelope = test::read_body_json(resp).await;
        assert_eq!(envelope.status, 400);
        assert!(envelope.message.starts_with("Invalid request"), "{}", envelope.message);
    }
}

#[actix_web::test]
async fn oversized_bodies_are_rejected() {
    let app = mock_app!(RelayConfig {
        max_json_bytes: 64,
        ..RelayConfig::default()
    });

    let long = "x".repeat(200);
    let req = test::TestRequest::post()
        .uri("/chat")
        .set_json(json!({"messages": [{"role": "user", "content": long}]}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[actix_web::test]
async fn streaming_sends_plain_text_chunks() {
    let app = mock_app!(RelayConfig::default());

    let req = test::TestRequest::post()
        .uri("/chat")
        .set_json(json!({"messages": [{"role": "user", "content": "hello"}], "stream": true}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/plain; charset=utf-8"
    );

    let body = test::read_body(resp).await;
    assert_eq!(body, MOCK_REPLY.as_bytes());
}

#[actix_web::test]
async fn multipart_image_is_accepted() {
    let app = mock_app!(RelayConfig::default());

    let payload = json!({"messages": [{"role": "user", "content": "what is this?"}]});
    let req = test::TestRequest::post()
        .uri("/chat")
        .insert_header((header::CONTENT_TYPE, multipart_content_type()))
        .set_payload(multipart_body(&payload, Some(("cat.png", "image/png", &b"\x89PNG"[..]))))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let envelope: Envelope = test::read_body_json(resp).await;
    assert_eq!(envelope.message, MOCK_REPLY);
}

#[actix_web::test]
async fn streaming_with_an_image_is_rejected() {
    let app = mock_app!(RelayConfig::default());

    let payload = json!({"messages": [{"role": "user", "content": "hi"}], "stream": true});
    let req = test::TestRequest::post()
        .uri("/chat")
        .insert_header((header::CONTENT_TYPE, multipart_content_type()))
        .set_payload(multipart_body(&payload, Some(("cat.png", "image/png", &b"\x89PNG"[..]))))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn multipart_without_payload_is_rejected() {
    let app = mock_app!(RelayConfig::default());

    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"cat.png\"\r\nContent-Type: image/png\r\n\r\nabc\r\n--{b}--\r\n",
        b = support::BOUNDARY
    );
    let req = test::TestRequest::post()
        .uri("/chat")
        .insert_header((header::CONTENT_TYPE, multipart_content_type()))
        .set_payload(body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn upload_pdf_is_acknowledged_in_mock_mode() {
    let app = mock_app!(RelayConfig::default());

    let req = test::TestRequest::post()
        .uri("/upload_pdf")
        .insert_header((header::CONTENT_TYPE, "application/pdf"))
        .set_payload("%PDF-1.4 fake")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let envelope: Envelope = test::read_body_json(resp).await;
    assert_eq!(envelope, Envelope::ok(MOCK_PDF_REPLY));
}

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    response::Response,
};
use llm_stream_gateway::{
    backend::mock::{MockBackend, MockStep},
    build_app,
    state::AppState,
};
use tower::util::ServiceExt;

fn app_with(backend: MockBackend) -> axum::Router {
    build_app(AppState::new_for_tests(Arc::new(backend)))
}

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_owned()))
        .expect("request build")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("request build")
}

async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("body should be readable");
    String::from_utf8(bytes.to_vec()).expect("response body should be UTF-8")
}

async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_str(&body_text(response).await).expect("response body should be JSON")
}

#[tokio::test]
async fn stream_relays_chunks_then_done_event() {
    let app = app_with(MockBackend::fragments(&[
        "{\"response\":\"He\",\"done\":false}\n",
        "{\"response\":\"llo\",\"done\":false}\n",
        "{\"response\":\"\",\"done\":true}\n",
    ]));

    let response = app
        .oneshot(post_json("/api/llm/stream", r#"{"prompt":"hello"}"#))
        .await
        .expect("request execution");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("content-type")
            .and_then(|value| value.to_str().ok()),
        Some("text/event-stream")
    );
    assert_eq!(
        response
            .headers()
            .get("cache-control")
            .and_then(|value| value.to_str().ok()),
        Some("no-cache")
    );

    let body = body_text(response).await;
    assert_eq!(
        body,
        concat!(
            "data: {\"chunk\":\"He\",\"done\":false}\n\n",
            "data: {\"chunk\":\"llo\",\"done\":false}\n\n",
            "event: done\ndata: {\"text\":\"Hello\"}\n\n",
        )
    );
}

#[tokio::test]
async fn stream_mid_flight_failure_ends_with_error_event() {
    let app = app_with(MockBackend::scripted(vec![
        MockStep::Fragment("{\"response\":\"par\"}\n".into()),
        MockStep::Fail("connection reset".to_owned()),
    ]));

    let response = app
        .oneshot(post_json("/api/llm/stream", r#"{"prompt":"hello"}"#))
        .await
        .expect("request execution");

    let body = body_text(response).await;
    assert!(body.starts_with("data: {\"chunk\":\"par\",\"done\":false}\n\n"));
    assert!(body.ends_with(
        "event: error\ndata: {\"error\":\"backend stream failed: connection reset\"}\n\n"
    ));
    assert_eq!(body.matches("event: ").count(), 1);
}

#[tokio::test]
async fn stream_against_unreachable_backend_sends_error_event() {
    let app = app_with(MockBackend::unreachable("connection refused"));

    let response = app
        .oneshot(post_json("/api/llm/stream", r#"{"prompt":"hello"}"#))
        .await
        .expect("request execution");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_text(response).await,
        "event: error\ndata: {\"error\":\"backend unreachable: connection refused\"}\n\n"
    );
}

#[tokio::test]
async fn stream_rejects_missing_prompt_before_contacting_backend() {
    let backend = MockBackend::fragments(&["{\"done\":true}\n"]);
    let app = build_app(AppState::new_for_tests(Arc::new(backend.clone())));

    let response = app
        .oneshot(post_json("/api/llm/stream", r#"{"model":"llama3"}"#))
        .await
        .expect("request execution");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(
        body["error"],
        "prompt is required and must be a non-empty string"
    );
    assert_eq!(backend.opened_streams(), 0);
}

#[tokio::test]
async fn wrongly_typed_prompt_is_a_bad_request() {
    let app = app_with(MockBackend::default());

    let response = app
        .oneshot(post_json("/api/llm/generate", r#"{"prompt":42}"#))
        .await
        .expect("request execution");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["success"], false);
}

#[tokio::test]
async fn generate_returns_full_text_in_envelope() {
    let app = app_with(MockBackend::default());

    let response = app
        .oneshot(post_json(
            "/api/llm/generate",
            r#"{"prompt":"say hi","model":"mock-small"}"#,
        ))
        .await
        .expect("request execution");

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(
        body["data"]["text"],
        "Mock response for model mock-small: say hi"
    );
    assert_eq!(body["data"]["model"], "mock-small");
}

#[tokio::test]
async fn generate_with_malformed_backend_body_is_bad_gateway() {
    let app = app_with(MockBackend::default().with_reply_body("not json"));

    let response = app
        .oneshot(post_json("/api/llm/generate", r#"{"prompt":"hi"}"#))
        .await
        .expect("request execution");

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn generate_against_unreachable_backend_is_service_unavailable() {
    let app = app_with(MockBackend::unreachable("connection refused"));

    let response = app
        .oneshot(post_json("/api/llm/generate", r#"{"prompt":"hi"}"#))
        .await
        .expect("request execution");

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        body_json(response).await["error"],
        "backend unreachable: connection refused"
    );
}

#[tokio::test]
async fn chat_flattens_messages_and_replies_as_assistant() {
    let app = app_with(MockBackend::default());

    let response = app
        .oneshot(post_json(
            "/api/llm/chat",
            r#"{"messages":[{"role":"user","content":"hello"}],"model":"mock-large"}"#,
        ))
        .await
        .expect("request execution");

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["role"], "assistant");
    assert_eq!(
        body["data"]["content"],
        "Mock response for model mock-large: user: hello"
    );
}

#[tokio::test]
async fn chat_accepts_any_role_name() {
    let app = app_with(MockBackend::default());

    let response = app
        .oneshot(post_json(
            "/api/llm/chat",
            r#"{"messages":[{"role":"developer","content":"hi"}]}"#,
        ))
        .await
        .expect("request execution");

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let content = body["data"]["content"]
        .as_str()
        .expect("content should be a string");
    assert!(content.contains("developer: hi"), "content was {content}");
}

#[tokio::test]
async fn chat_without_messages_is_rejected() {
    let app = app_with(MockBackend::default());

    let response = app
        .oneshot(post_json("/api/llm/chat", r#"{"messages":[]}"#))
        .await
        .expect("request execution");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn models_are_listed_and_looked_up() {
    let app = app_with(MockBackend::default());

    let listed = app
        .clone()
        .oneshot(get("/api/llm/models"))
        .await
        .expect("request execution");
    assert_eq!(listed.status(), StatusCode::OK);
    let body = body_json(listed).await;
    assert_eq!(body["count"], 2);
    assert_eq!(body["data"][0]["name"], "mock-small");

    let found = app
        .clone()
        .oneshot(get("/api/llm/models/mock-large"))
        .await
        .expect("request execution");
    assert_eq!(found.status(), StatusCode::OK);
    assert_eq!(body_json(found).await["data"]["name"], "mock-large");

    let missing = app
        .oneshot(get("/api/llm/models/nope"))
        .await
        .expect("request execution");
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(missing).await["error"], "Model 'nope' not found");
}

#[tokio::test]
async fn backend_health_reflects_reachability() {
    let healthy = app_with(MockBackend::default())
        .oneshot(get("/api/llm/health"))
        .await
        .expect("request execution");
    assert_eq!(healthy.status(), StatusCode::OK);
    assert_eq!(body_json(healthy).await["ollamaUrl"], "mock://local");

    let down = app_with(MockBackend::unreachable("refused"))
        .oneshot(get("/api/llm/health"))
        .await
        .expect("request execution");
    assert_eq!(down.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(down).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["ollamaUrl"], "mock://local");
}

#[tokio::test]
async fn gateway_health_and_cors_preflight() {
    let app = app_with(MockBackend::default());

    let health = app
        .clone()
        .oneshot(get("/health"))
        .await
        .expect("request execution");
    assert_eq!(health.status(), StatusCode::OK);
    assert_eq!(
        health
            .headers()
            .get("access-control-allow-origin")
            .and_then(|value| value.to_str().ok()),
        Some("*")
    );
    let body = body_json(health).await;
    assert_eq!(body["status"], "ok");
    let timestamp = body["timestamp"]
        .as_str()
        .expect("timestamp should be a string");
    let parsed =
        chrono::DateTime::parse_from_rfc3339(timestamp).expect("timestamp should be RFC 3339");
    assert_eq!(parsed.offset().local_minus_utc(), 0);
    assert!(timestamp.ends_with('Z'));

    let preflight = app
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/api/llm/stream")
                .body(Body::empty())
                .expect("request build"),
        )
        .await
        .expect("request execution");
    assert_eq!(preflight.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn metrics_expose_stream_outcomes() {
    let state = AppState::new_for_tests(Arc::new(MockBackend::fragments(&[
        "{\"response\":\"ok\",\"done\":true}\n",
    ])));
    let app = build_app(state.clone());

    let response = app
        .clone()
        .oneshot(post_json("/api/llm/stream", r#"{"prompt":"hello"}"#))
        .await
        .expect("request execution");
    body_text(response).await;

    let metrics = app
        .oneshot(get("/metrics"))
        .await
        .expect("request execution");
    let body = body_text(metrics).await;
    assert!(body.contains("gateway_stream_outcomes_total{outcome=\"completed\"} 1"));
}

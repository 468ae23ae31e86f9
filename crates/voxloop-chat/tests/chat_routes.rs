//! Integration tests for the chat endpoint.
//!
//! Route tests drive the router with `oneshot` against a mock completion
//! backend. The HTTP client tests point `OpenAiCompletions` at a throwaway
//! axum upstream on `127.0.0.1:0`.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use voxloop_chat::upstream::{ChatMessage, CompletionChoice, CompletionRequest, CompletionResponse};
use voxloop_chat::{
    ChatContext, ChatError, ChatServerConfig, CompletionBackend, OpenAiCompletions, create_router,
    serve,
};

// ── Mock backend ──────────────────────────────────────────────────────────────

/// Records every request and answers with a canned outcome.
struct MockCompletions {
    reply: Option<String>,
    fail: bool,
    seen: Mutex<Vec<CompletionRequest>>,
}

impl MockCompletions {
    fn answering(reply: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.map(ToString::to_string),
            fail: false,
            seen: Mutex::new(Vec::new()),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            reply: None,
            fail: true,
            seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl CompletionBackend for MockCompletions {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, ChatError> {
        self.seen.lock().unwrap().push(request.clone());
        if self.fail {
            return Err(ChatError::Upstream("429 Too Many Requests".to_string()));
        }
        Ok(CompletionResponse {
            choices: vec![CompletionChoice {
                message: ChatMessage {
                    role: "assistant".to_string(),
                    content: self.reply.clone(),
                },
            }],
        })
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn app(backend: Arc<MockCompletions>) -> Router {
    create_router(Arc::new(ChatContext::new(ChatServerConfig::default(), backend)))
}

fn post_chat(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/chat")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Assert the response body is valid JSON and return the parsed value.
async fn parse_json(response: axum::response::Response) -> Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap_or_else(|e| panic!("Expected valid JSON body: {e}"))
}

// ── POST /api/chat ────────────────────────────────────────────────────────────

#[tokio::test]
async fn chat_returns_first_choice() {
    let backend = MockCompletions::answering(Some("Hi there!"));
    let response = app(Arc::clone(&backend))
        .oneshot(post_chat(r#"{"message":"hello"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(parse_json(response).await, json!({ "response": "Hi there!" }));

    let seen = backend.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    let request = &seen[0];
    assert_eq!(request.model, "gpt-3.5-turbo");
    assert_eq!(request.max_tokens, 150);
    assert_eq!(
        request.messages,
        vec![
            ChatMessage::system(voxloop_chat::config::DEFAULT_SYSTEM_PROMPT),
            ChatMessage::user("hello"),
        ]
    );
}

#[tokio::test]
async fn empty_choice_uses_fallback() {
    let response = app(MockCompletions::answering(None))
        .oneshot(post_chat(r#"{"message":"hello"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        parse_json(response).await,
        json!({ "response": "I'm sorry, I couldn't process that." })
    );
}

#[tokio::test]
async fn missing_or_blank_message_is_400() {
    for body in [r"{}", r#"{"message":""}"#, r#"{"message":"   "}"#] {
        let backend = MockCompletions::answering(Some("unused"));
        let response = app(Arc::clone(&backend)).oneshot(post_chat(body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body {body}");
        assert_eq!(parse_json(response).await, json!({ "error": "Message is required" }));
        assert!(backend.seen.lock().unwrap().is_empty());
    }
}

#[tokio::test]
async fn malformed_body_is_400_json() {
    let response = app(MockCompletions::answering(Some("unused")))
        .oneshot(post_chat("not json"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(parse_json(response).await["error"].is_string());
}

#[tokio::test]
async fn upstream_failure_is_500() {
    let response = app(MockCompletions::failing())
        .oneshot(post_chat(r#"{"message":"hello"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        parse_json(response).await,
        json!({ "error": "Failed to get response from upstream model" })
    );
}

#[tokio::test]
async fn wrong_method_is_405() {
    let response = app(MockCompletions::answering(Some("x")))
        .oneshot(Request::builder().uri("/api/chat").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

// ── GET /health ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_is_ok() {
    let response = app(MockCompletions::answering(None))
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(parse_json(response).await, json!({ "status": "ok" }));
}

// ── OpenAiCompletions against a local upstream ────────────────────────────────

type Captured = Arc<Mutex<Vec<(Option<String>, Value)>>>;

async fn fake_upstream(status: StatusCode, reply: Value) -> (String, Captured) {
    let captured: Captured = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&captured);
    let app = Router::new().route(
        "/v1/chat/completions",
        post(move |headers: HeaderMap, Json(body): Json<Value>| {
            let sink = Arc::clone(&sink);
            let reply = reply.clone();
            async move {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .map(ToString::to_string);
                sink.lock().unwrap().push((auth, body));
                (status, Json(reply))
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/v1"), captured)
}

#[tokio::test]
async fn client_posts_completion_with_bearer_key() {
    let (base, captured) = fake_upstream(
        StatusCode::OK,
        json!({ "choices": [{ "message": { "role": "assistant", "content": "Hi there!" } }] }),
    )
    .await;

    let client = OpenAiCompletions::new(base, Some("sk-test".to_string()));
    let request = CompletionRequest {
        model: "gpt-3.5-turbo".to_string(),
        messages: vec![ChatMessage::user("hello")],
        max_tokens: 150,
        temperature: 0.5,
    };
    let reply = client.complete(&request).await.unwrap();
    assert_eq!(reply.first_content(), Some("Hi there!"));

    let captured = captured.lock().unwrap();
    let (auth, body) = &captured[0];
    assert_eq!(auth.as_deref(), Some("Bearer sk-test"));
    assert_eq!(body["model"], "gpt-3.5-turbo");
    assert_eq!(body["max_tokens"], 150);
    assert_eq!(body["messages"][0]["role"], "user");
}

#[tokio::test]
async fn client_reports_upstream_status() {
    let (base, _) = fake_upstream(
        StatusCode::TOO_MANY_REQUESTS,
        json!({ "error": { "message": "rate limited" } }),
    )
    .await;

    let client = OpenAiCompletions::new(base, None);
    let request = CompletionRequest {
        model: "m".to_string(),
        messages: vec![ChatMessage::user("hello")],
        max_tokens: 1,
        temperature: 0.0,
    };
    let err = client.complete(&request).await.unwrap_err();
    assert!(matches!(err, ChatError::Upstream(ref msg) if msg.contains("429")), "got {err:?}");
}

// ── serve ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn serve_answers_until_shutdown() {
    let (base, _) = fake_upstream(
        StatusCode::OK,
        json!({ "choices": [{ "message": { "role": "assistant", "content": "pong" } }] }),
    )
    .await;

    let config = ChatServerConfig {
        upstream_base: base,
        api_key: Some("sk-test".to_string()),
        ..ChatServerConfig::default()
    };
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(serve(listener, config, async {
        let _ = stop_rx.await;
    }));

    let reply: Value = reqwest::Client::new()
        .post(format!("http://{addr}/api/chat"))
        .json(&json!({ "message": "ping" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(reply, json!({ "response": "pong" }));

    stop_tx.send(()).unwrap();
    server.await.unwrap().unwrap();
}

use std::time::Duration;

use ai_client::{AiError, OpenAi};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Debug, Deserialize, JsonSchema)]
struct Answer {
    found: bool,
    note: Option<String>,
}

fn ai_for(server: &MockServer) -> OpenAi {
    OpenAi::new("sk-test", "gpt-4o-mini")
        .with_base_url(format!("{}/v1", server.uri()))
        .with_timeout(Duration::from_secs(5))
}

fn completion(content: &str) -> serde_json::Value {
    json!({
        "choices": [{ "message": { "role": "assistant", "content": content } }]
    })
}

#[tokio::test]
async fn extract_sends_strict_schema_and_parses_reply() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "gpt-4o-mini",
            "response_format": { "type": "json_schema", "json_schema": { "strict": true } }
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion(r#"{"found": true, "note": "40% off"}"#)),
        )
        .mount(&server)
        .await;

    let answer: Answer = ai_for(&server).extract("system", "user").await.unwrap();

    assert!(answer.found);
    assert_eq!(answer.note.as_deref(), Some("40% off"));
}

#[tokio::test]
async fn structured_output_returns_raw_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("```json\n{}\n```")))
        .mount(&server)
        .await;

    let raw = ai_for(&server)
        .structured_output("system", "user", json!({"type": "object"}))
        .await
        .unwrap();

    assert!(raw.starts_with("```json"));
}

#[tokio::test]
async fn rate_limit_surfaces_as_transient_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .mount(&server)
        .await;

    let err = ai_for(&server)
        .extract::<Answer>("system", "user")
        .await
        .unwrap_err();

    assert!(matches!(err, AiError::Api { status: 429, .. }));
    assert!(err.is_transient());
}

#[tokio::test]
async fn empty_choices_is_empty_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
        .mount(&server)
        .await;

    let err = ai_for(&server)
        .structured_output("system", "user", json!({}))
        .await
        .unwrap_err();

    assert!(matches!(err, AiError::EmptyResponse));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn malformed_reply_is_parse_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("not json")))
        .mount(&server)
        .await;

    let err = ai_for(&server)
        .extract::<Answer>("system", "user")
        .await
        .unwrap_err();

    assert!(matches!(err, AiError::Parse(_)));
}

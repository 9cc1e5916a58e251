use std::time::Duration;

use firecrawl_client::{FirecrawlClient, FirecrawlError, PageFormat};
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn client_for(server: &MockServer) -> FirecrawlClient {
    FirecrawlClient::new("fc-test", Duration::from_secs(5))
        .unwrap()
        .with_base_url(&server.uri())
}

#[tokio::test]
async fn prefers_html_over_markdown() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/scrape"))
        .and(header("authorization", "Bearer fc-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "creditsUsed": 2,
            "data": {
                "html": "<div class=\"banner\">Summer Sale</div>",
                "markdown": "Summer Sale",
                "metadata": { "title": "Shop" }
            }
        })))
        .mount(&server)
        .await;

    let page = client_for(&server).await.scrape("https://shop.example").await.unwrap();

    assert_eq!(page.format, PageFormat::Html);
    assert!(page.content.contains("banner"));
    assert_eq!(page.credits_used, 2);
    assert_eq!(page.metadata["title"], "Shop");
}

#[tokio::test]
async fn falls_back_to_markdown_and_default_credit() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/scrape"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": { "markdown": "# 20% off everything" }
        })))
        .mount(&server)
        .await;

    let page = client_for(&server).await.scrape("https://shop.example").await.unwrap();

    assert_eq!(page.format, PageFormat::Markdown);
    assert_eq!(page.credits_used, 1);
}

#[tokio::test]
async fn server_error_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
        .mount(&server)
        .await;

    let err = client_for(&server).await.scrape("https://shop.example").await.unwrap_err();

    assert!(matches!(err, FirecrawlError::Api { status: 503, .. }));
    assert!(err.is_transient());
}

#[tokio::test]
async fn unsuccessful_payload_is_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "error": "blocked"
        })))
        .mount(&server)
        .await;

    let err = client_for(&server).await.scrape("https://shop.example").await.unwrap_err();

    assert!(matches!(err, FirecrawlError::Unsuccessful(ref m) if m == "blocked"));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn empty_content_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": { "html": "   ", "markdown": "" }
        })))
        .mount(&server)
        .await;

    let err = client_for(&server).await.scrape("https://shop.example").await.unwrap_err();

    assert!(matches!(err, FirecrawlError::EmptyContent));
}

#[test]
fn rate_limit_is_transient_but_bad_request_is_not() {
    let limited = FirecrawlError::Api { status: 429, message: String::new() };
    let bad = FirecrawlError::Api { status: 400, message: String::new() };
    assert!(limited.is_transient());
    assert!(!bad.is_transient());
}

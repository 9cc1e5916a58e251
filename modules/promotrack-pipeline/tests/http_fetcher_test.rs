use std::sync::Arc;
use std::time::Duration;

use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use promotrack_common::{AcquisitionTier, Target};
use promotrack_pipeline::acquirer::FetchError;
use promotrack_pipeline::testing::{plain_page, MockRenderService};
use promotrack_pipeline::{Acquirer, DirectFetcher, HttpFetcher};

fn fetcher(respect_robots: bool) -> HttpFetcher {
    HttpFetcher::new(Duration::from_secs(5), respect_robots).unwrap()
}

#[tokio::test]
async fn sends_browser_identity_and_returns_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .and(header_exists("user-agent"))
        .and(header_exists("accept-language"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html><body>Hi</body></html>"))
        .expect(1)
        .mount(&server)
        .await;

    let body = fetcher(true).fetch(&format!("{}/", server.uri())).await.unwrap();
    assert!(body.contains("Hi"));
}

#[tokio::test]
async fn non_success_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = fetcher(true).fetch(&format!("{}/", server.uri())).await.unwrap_err();
    assert!(matches!(err, FetchError::Status(503)));
}

#[tokio::test]
async fn robots_txt_disallow_is_honoured_and_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private\n"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = fetcher(true);
    assert!(!fetcher.robots_allows(&format!("{}/private/deals", server.uri())).await);
    assert!(fetcher.robots_allows(&format!("{}/", server.uri())).await);
}

#[tokio::test]
async fn missing_robots_txt_allows_everything() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    assert!(fetcher(true).robots_allows(&format!("{}/private", server.uri())).await);
}

#[tokio::test]
async fn robots_ignored_when_disabled() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /\n"))
        .expect(0)
        .mount(&server)
        .await;

    assert!(fetcher(false).robots_allows(&format!("{}/", server.uri())).await);
}

#[tokio::test]
async fn challenge_page_escalates_to_fallback() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "<html><head><title>Just a moment...</title></head>\
             <body><div class=\"cf-browser-verification\"></div></body></html>",
        ))
        .mount(&server)
        .await;

    let url = format!("{}/", server.uri());
    let render = Arc::new(MockRenderService::new().on_html(&url, plain_page()));
    let acquirer = Acquirer::new(Arc::new(fetcher(true)), render.clone());

    let acquired = acquirer.acquire(&Target::new("acme", url.clone())).await.unwrap();

    assert_eq!(acquired.tier, AcquisitionTier::Fallback);
    assert!(!acquired.robots_blocked);
    assert_eq!(render.calls(&url), 1);
}

#[tokio::test]
async fn slow_direct_fetch_times_out_into_fallback() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(plain_page())
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let url = format!("{}/", server.uri());
    let render = Arc::new(MockRenderService::new().on_markdown(&url, "# Shop"));
    let acquirer = Acquirer::new(Arc::new(fetcher(false)), render)
        .with_timeouts(Duration::from_millis(50), Duration::from_secs(5));

    let acquired = acquirer.acquire(&Target::new("acme", url)).await.unwrap();
    assert_eq!(acquired.tier, AcquisitionTier::Fallback);
}

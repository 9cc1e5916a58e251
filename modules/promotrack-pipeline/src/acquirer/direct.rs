use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use tracing::{debug, info, warn};

use super::robots::RobotsRules;
use super::{DirectFetcher, FetchError};

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
];

/// Direct HTTP fetch with a browser-like identity.
pub struct HttpFetcher {
    client: reqwest::Client,
    respect_robots: bool,
    robots_cache: Mutex<HashMap<String, Arc<RobotsRules>>>,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, respect_robots: bool) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| FetchError::Request(e.to_string()))?;
        info!(
            timeout_secs = timeout.as_secs(),
            respect_robots, "Using HttpFetcher for direct acquisition"
        );
        Ok(Self {
            client,
            respect_robots,
            robots_cache: Mutex::new(HashMap::new()),
        })
    }

    fn headers() -> HeaderMap {
        let ua = USER_AGENTS[rand::rng().random_range(0..USER_AGENTS.len())];
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(ua));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        headers
    }

    async fn robots_for(&self, origin: &str) -> Arc<RobotsRules> {
        let cached = self
            .robots_cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(origin)
            .cloned();
        if let Some(rules) = cached {
            return rules;
        }

        let robots_url = format!("{origin}/robots.txt");
        let rules = match self
            .client
            .get(&robots_url)
            .headers(Self::headers())
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => match resp.text().await {
                Ok(body) => RobotsRules::parse(&body),
                Err(_) => RobotsRules::allow_all(),
            },
            Ok(resp) => {
                debug!(url = robots_url.as_str(), status = resp.status().as_u16(), "No robots.txt");
                RobotsRules::allow_all()
            }
            Err(e) => {
                debug!(url = robots_url.as_str(), error = %e, "robots.txt unreachable");
                RobotsRules::allow_all()
            }
        };

        let rules = Arc::new(rules);
        self.robots_cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(origin.to_string(), rules.clone());
        rules
    }
}

#[async_trait]
impl DirectFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .headers(Self::headers())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout
                } else {
                    FetchError::Request(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Request(e.to_string()))?;
        info!(url, scraper = "direct", bytes = body.len(), "Scraped successfully");
        Ok(body)
    }

    async fn robots_allows(&self, url: &str) -> bool {
        if !self.respect_robots {
            return true;
        }
        let Ok(parsed) = url::Url::parse(url) else {
            return true;
        };
        let origin = parsed.origin().ascii_serialization();
        let rules = self.robots_for(&origin).await;
        let allowed = rules.is_allowed(parsed.path());
        if !allowed {
            warn!(url, "Direct fetch disallowed by robots.txt");
        }
        allowed
    }

    fn name(&self) -> &str {
        "direct"
    }
}

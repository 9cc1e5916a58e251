//! Tiered content acquisition: direct fetch first, rendering service second.

mod direct;
pub mod robots;

pub use direct::HttpFetcher;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use firecrawl_client::{FirecrawlClient, FirecrawlError, PageFormat};
use promotrack_common::{AcquisitionTier, ContentFormat, Target};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::AcquireError;

/// Case-insensitive markers of an anti-bot interstitial instead of the real page.
const BOT_CHALLENGE_MARKERS: &[&str] = &[
    "cf-browser-verification",
    "challenge-platform",
    "checking your browser before accessing",
    "just a moment...",
    "g-recaptcha",
    "h-captcha",
    "are you a robot",
    "_incapsula_resource",
    "perimeterx",
    "px-captcha",
    "access denied",
];

/// Direct-tier failure. Never retried; control passes to the fallback tier.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("HTTP status {0}")]
    Status(u16),

    #[error("request timed out")]
    Timeout,

    #[error("request failed: {0}")]
    Request(String),

    #[error("bot challenge detected ({0})")]
    BotChallenge(&'static str),

    #[error("empty body")]
    Empty,
}

/// Fallback-tier failure, classified by the service client.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct RenderError {
    pub message: String,
    pub transient: bool,
}

impl RenderError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: false,
        }
    }
}

impl From<FirecrawlError> for RenderError {
    fn from(err: FirecrawlError) -> Self {
        Self {
            transient: err.is_transient(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub content: String,
    pub format: ContentFormat,
    pub metadata: serde_json::Value,
    pub cost_units: u32,
}

#[async_trait]
pub trait DirectFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;

    /// Whether the site's robots.txt lets us fetch `url` directly.
    async fn robots_allows(&self, _url: &str) -> bool {
        true
    }

    fn name(&self) -> &str;
}

#[async_trait]
pub trait RenderService: Send + Sync {
    async fn render(&self, url: &str) -> Result<RenderedPage, RenderError>;
    fn name(&self) -> &str;
}

#[async_trait]
impl RenderService for FirecrawlClient {
    async fn render(&self, url: &str) -> Result<RenderedPage, RenderError> {
        let page = self.scrape(url).await?;
        Ok(RenderedPage {
            format: match page.format {
                PageFormat::Html => ContentFormat::Html,
                PageFormat::Markdown => ContentFormat::Markdown,
            },
            content: page.content,
            metadata: page.metadata,
            cost_units: page.credits_used,
        })
    }

    fn name(&self) -> &str {
        "firecrawl"
    }
}

/// Page content held in memory between the acquire and classify stages.
#[derive(Debug, Clone)]
pub struct AcquiredContent {
    pub body: String,
    pub format: ContentFormat,
    pub tier: AcquisitionTier,
    pub cost_units: u32,
    pub robots_blocked: bool,
    pub duration: Duration,
    pub metadata: serde_json::Value,
}

pub struct Acquirer {
    direct: Arc<dyn DirectFetcher>,
    fallback: Arc<dyn RenderService>,
    direct_timeout: Duration,
    fallback_timeout: Duration,
}

impl Acquirer {
    pub fn new(direct: Arc<dyn DirectFetcher>, fallback: Arc<dyn RenderService>) -> Self {
        Self {
            direct,
            fallback,
            direct_timeout: Duration::from_secs(10),
            fallback_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_timeouts(mut self, direct: Duration, fallback: Duration) -> Self {
        self.direct_timeout = direct;
        self.fallback_timeout = fallback;
        self
    }

    /// One pass through the cascade. Retrying is the caller's business.
    pub async fn acquire(&self, target: &Target) -> Result<AcquiredContent, AcquireError> {
        let started = Instant::now();
        let url = target.url.as_str();
        let robots_blocked = !self.direct.robots_allows(url).await;

        let direct_error = if robots_blocked {
            None
        } else {
            match self.fetch_direct(url).await {
                Ok(body) => {
                    info!(
                        target_id = %target.id,
                        tier = "direct",
                        bytes = body.len(),
                        "Acquired content"
                    );
                    return Ok(AcquiredContent {
                        body,
                        format: ContentFormat::Html,
                        tier: AcquisitionTier::Direct,
                        cost_units: 0,
                        robots_blocked,
                        duration: started.elapsed(),
                        metadata: serde_json::Value::Null,
                    });
                }
                Err(e) => {
                    warn!(
                        target_id = %target.id,
                        tier = "direct",
                        fetcher = self.direct.name(),
                        error = %e,
                        "Direct fetch failed, escalating to fallback"
                    );
                    Some(e)
                }
            }
        };

        let rendered = tokio::time::timeout(self.fallback_timeout, self.fallback.render(url))
            .await
            .unwrap_or_else(|_| Err(RenderError::transient("fallback service timed out")));

        match rendered {
            Ok(page) => {
                info!(
                    target_id = %target.id,
                    tier = "fallback",
                    service = self.fallback.name(),
                    bytes = page.content.len(),
                    cost_units = page.cost_units,
                    "Acquired content"
                );
                Ok(AcquiredContent {
                    body: page.content,
                    format: page.format,
                    tier: AcquisitionTier::Fallback,
                    cost_units: page.cost_units.max(1),
                    robots_blocked,
                    duration: started.elapsed(),
                    metadata: page.metadata,
                })
            }
            Err(fallback) => Err(AcquireError {
                direct: direct_error,
                robots_blocked,
                fallback,
            }),
        }
    }

    async fn fetch_direct(&self, url: &str) -> Result<String, FetchError> {
        let body = tokio::time::timeout(self.direct_timeout, self.direct.fetch(url))
            .await
            .map_err(|_| FetchError::Timeout)??;
        if body.trim().is_empty() {
            return Err(FetchError::Empty);
        }
        if let Some(marker) = bot_challenge_marker(&body) {
            return Err(FetchError::BotChallenge(marker));
        }
        Ok(body)
    }
}

/// First bot-challenge marker found in `body`, if any.
pub fn bot_challenge_marker(body: &str) -> Option<&'static str> {
    let lower = body.to_lowercase();
    BOT_CHALLENGE_MARKERS
        .iter()
        .copied()
        .find(|marker| lower.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_challenge_pages() {
        assert_eq!(
            bot_challenge_marker("<title>Just a moment...</title>"),
            Some("just a moment...")
        );
        assert_eq!(
            bot_challenge_marker("<h1>Access Denied</h1>"),
            Some("access denied")
        );
        assert_eq!(bot_challenge_marker("<h1>Summer Sale</h1>"), None);
    }

    #[test]
    fn firecrawl_errors_keep_transience() {
        let busy: RenderError = FirecrawlError::Api {
            status: 503,
            message: "busy".into(),
        }
        .into();
        assert!(busy.transient);

        let bad: RenderError = FirecrawlError::Unsuccessful("blocked".into()).into();
        assert!(!bad.transient);
    }
}

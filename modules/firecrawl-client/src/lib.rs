pub mod error;
pub mod types;

pub use error::{FirecrawlError, Result};
pub use types::{PageFormat, ScrapeRequest, ScrapedPage};

use std::time::Duration;

use tracing::{debug, info};
use types::ScrapeResponse;

const DEFAULT_BASE_URL: &str = "https://api.firecrawl.dev";

pub struct FirecrawlClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl FirecrawlClient {
    pub fn new(api_key: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Render a URL and return its main content. HTML is preferred over
    /// markdown so that CSS-based extraction can run on the result.
    pub async fn scrape(&self, url: &str) -> Result<ScrapedPage> {
        let endpoint = format!("{}/v2/scrape", self.base_url);
        let body = ScrapeRequest::new(url);

        debug!(url, "Firecrawl scrape request");

        let resp = self
            .client
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(FirecrawlError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let text = resp.text().await?;
        let parsed: ScrapeResponse = serde_json::from_str(&text)?;

        if !parsed.success {
            return Err(FirecrawlError::Unsuccessful(
                parsed.error.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }

        let data = parsed.data.ok_or(FirecrawlError::EmptyContent)?;
        let credits_used = parsed.credits_used.unwrap_or(1);

        let (content, format) = match (data.html, data.markdown, data.raw_html) {
            (Some(html), _, _) if !html.trim().is_empty() => (html, PageFormat::Html),
            (_, Some(md), _) if !md.trim().is_empty() => (md, PageFormat::Markdown),
            (_, _, Some(raw)) if !raw.trim().is_empty() => (raw, PageFormat::Html),
            _ => return Err(FirecrawlError::EmptyContent),
        };

        info!(url, bytes = content.len(), credits_used, "Firecrawl scrape complete");

        Ok(ScrapedPage {
            content,
            format,
            metadata: data.metadata,
            credits_used,
        })
    }
}

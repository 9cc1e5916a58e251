use serde::{Deserialize, Serialize};

/// Request body for `POST /v2/scrape`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeRequest {
    pub url: String,
    pub formats: Vec<String>,
    pub only_main_content: bool,
    pub exclude_tags: Vec<String>,
    pub wait_for: u32,
}

impl ScrapeRequest {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            formats: vec!["html".to_string(), "markdown".to_string()],
            only_main_content: true,
            exclude_tags: ["nav", "footer", "script", "style"]
                .iter()
                .map(|t| t.to_string())
                .collect(),
            wait_for: 0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ScrapeResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub data: Option<ScrapeData>,
    #[serde(default)]
    pub credits_used: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ScrapeData {
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub markdown: Option<String>,
    #[serde(default)]
    pub raw_html: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Which representation the service handed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageFormat {
    Html,
    Markdown,
}

/// A rendered page, normalized from the scrape response.
#[derive(Debug, Clone)]
pub struct ScrapedPage {
    pub content: String,
    pub format: PageFormat,
    /// Page metadata as returned by the service (title, status code, ...).
    pub metadata: serde_json::Value,
    pub credits_used: u32,
}

use ai_client::util::strip_code_fence;
use ai_client::{AiError, OpenAi, StructuredOutput};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use thiserror::Error;

use promotrack_common::{PromotionCategory, TargetId};

const SYSTEM_PROMPT: &str = "You analyse the text of a retail website's home page and decide \
whether a promotion is currently running. Reply only with JSON matching the schema. \
`has_promotion` is true only for a live, currently active offer (a sale, clearance, coupon, \
discount or free shipping offer). `promotion_text` quotes the promotional copy verbatim from \
the page, or is null when there is none. `confidence` is your certainty between 0 and 1. \
`category` is one of sitewide_sale, category_sale, coupon, free_shipping, none.";

const FIELDS: [&str; 4] = ["has_promotion", "promotion_text", "confidence", "category"];

/// What the classification service is asked about.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub target_id: TargetId,
    pub target_name: String,
    pub url: String,
    pub excerpt: String,
}

impl ModelRequest {
    pub fn user_prompt(&self) -> String {
        format!(
            "Site: {} ({})\nURL: {}\n\nPage text:\n{}",
            self.target_name, self.target_id, self.url, self.excerpt
        )
    }
}

/// A classification service that returns raw, unvalidated JSON text.
#[async_trait]
pub trait PromotionModel: Send + Sync {
    async fn classify(&self, request: &ModelRequest) -> Result<String, ModelError>;
    fn name(&self) -> &str;
}

#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("classification service error: {message}")]
    Service { message: String, transient: bool },

    #[error("classification service timed out")]
    Timeout,

    #[error("schema violation: {0}")]
    Schema(#[from] SchemaError),
}

impl ModelError {
    /// Retried within the model tier's own budget.
    pub fn is_retryable(&self) -> bool {
        match self {
            ModelError::Service { transient, .. } => *transient,
            ModelError::Timeout | ModelError::Schema(_) => true,
        }
    }
}

impl From<AiError> for ModelError {
    fn from(err: AiError) -> Self {
        match err {
            AiError::Timeout => ModelError::Timeout,
            other => ModelError::Service {
                transient: other.is_transient(),
                message: other.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{0}")]
pub struct SchemaError(pub String);

/// The only shape the classification service may answer with.
#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ParsedVerdict {
    pub has_promotion: bool,
    pub promotion_text: Option<String>,
    pub confidence: f64,
    pub category: PromotionCategory,
}

/// Strictly validate a raw service reply. Tolerates one surrounding code fence.
pub fn parse_verdict(raw: &str) -> Result<ParsedVerdict, SchemaError> {
    let value: serde_json::Value = serde_json::from_str(strip_code_fence(raw))
        .map_err(|e| SchemaError(format!("not JSON: {e}")))?;

    let object = value
        .as_object()
        .ok_or_else(|| SchemaError("top level is not an object".into()))?;
    if let Some(missing) = FIELDS.iter().find(|f| !object.contains_key(**f)) {
        return Err(SchemaError(format!("missing field `{missing}`")));
    }

    let parsed: ParsedVerdict =
        serde_json::from_value(value).map_err(|e| SchemaError(e.to_string()))?;

    if !parsed.confidence.is_finite() || !(0.0..=1.0).contains(&parsed.confidence) {
        return Err(SchemaError(format!(
            "confidence {} outside [0, 1]",
            parsed.confidence
        )));
    }
    let has_text = parsed
        .promotion_text
        .as_deref()
        .is_some_and(|t| !t.trim().is_empty());
    if parsed.has_promotion && !has_text {
        return Err(SchemaError(
            "has_promotion is true but promotion_text is empty".into(),
        ));
    }

    Ok(parsed)
}

/// OpenAI-backed classification using strict structured output.
pub struct OpenAiPromotionModel {
    ai: OpenAi,
}

impl OpenAiPromotionModel {
    pub fn new(ai: OpenAi) -> Self {
        Self { ai }
    }
}

#[async_trait]
impl PromotionModel for OpenAiPromotionModel {
    async fn classify(&self, request: &ModelRequest) -> Result<String, ModelError> {
        let raw = self
            .ai
            .structured_output(
                SYSTEM_PROMPT,
                &request.user_prompt(),
                ParsedVerdict::openai_schema(),
            )
            .await?;
        Ok(raw)
    }

    fn name(&self) -> &str {
        self.ai.model()
    }
}

//! Tiered promotion classification: cached selector rules, then the model,
//! then an unresolved verdict flagged for review.

pub mod excerpt;
pub mod hint;
pub mod model;
pub mod rules;

pub use model::{
    parse_verdict, ModelError, ModelRequest, OpenAiPromotionModel, ParsedVerdict, PromotionModel,
    SchemaError,
};

use std::sync::Arc;
use std::time::Duration;

use ai_client::util::truncate_to_char_boundary;
use chrono::{NaiveDate, Utc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use promotrack_common::{
    CapabilityHint, ContentFormat, ContentRef, DetectionTier, Target, Verdict,
};

use crate::acquirer::AcquiredContent;
use crate::notify::ReviewRequest;
use crate::retry::RetryPolicy;

/// Everything the classify stage produces; persisted by the caller.
#[derive(Debug, Clone)]
pub struct Classification {
    pub verdict: Verdict,
    pub learned_hint: Option<CapabilityHint>,
    pub review: Option<ReviewRequest>,
}

pub struct Classifier {
    model: Arc<dyn PromotionModel>,
    retry: RetryPolicy,
    model_timeout: Duration,
}

impl Classifier {
    pub fn new(model: Arc<dyn PromotionModel>) -> Self {
        Self {
            model,
            retry: RetryPolicy::default().with_max_attempts(2),
            model_timeout: Duration::from_secs(30),
        }
    }

    /// Retry policy for the model tier alone.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_model_timeout(mut self, timeout: Duration) -> Self {
        self.model_timeout = timeout;
        self
    }

    /// Never fails: an unusable model answer becomes an unresolved verdict.
    pub async fn classify(
        &self,
        target: &Target,
        content: &AcquiredContent,
        content_ref: Option<ContentRef>,
        observation_date: NaiveDate,
        deadline: Option<Instant>,
    ) -> Classification {
        let base = Verdict {
            target_id: target.id.clone(),
            observation_date,
            has_promotion: false,
            promotion_text: None,
            confidence: 0.0,
            detection_tier: DetectionTier::Unresolved,
            category: None,
            content_ref: content_ref.clone(),
            observed_at: Utc::now(),
        };

        if let Some((text, hits)) = rule_based(target, content) {
            let confidence = rules::rule_confidence(hits.len());
            info!(
                target_id = %target.id,
                tier = "rule_based",
                keywords = ?hits,
                confidence,
                "Promotion detected by cached rules"
            );
            return Classification {
                verdict: Verdict {
                    has_promotion: true,
                    promotion_text: Some(text),
                    confidence,
                    detection_tier: DetectionTier::RuleBased,
                    ..base
                },
                learned_hint: None,
                review: None,
            };
        }

        let request = ModelRequest {
            target_id: target.id.clone(),
            target_name: target.display_name().to_string(),
            url: target.url.clone(),
            excerpt: excerpt::excerpt(&content.body, content.format, &target.url),
        };

        match self.ask_model(&request, deadline).await {
            Ok(parsed) => {
                info!(
                    target_id = %target.id,
                    tier = "model_based",
                    model = self.model.name(),
                    has_promotion = parsed.has_promotion,
                    confidence = parsed.confidence,
                    "Classified by model"
                );
                let learned_hint = match (&parsed.promotion_text, parsed.has_promotion) {
                    (Some(text), true) if content.format == ContentFormat::Html => {
                        hint::derive_hint(&content.body, text, Utc::now())
                    }
                    _ => None,
                };
                if let Some(hint) = &learned_hint {
                    debug!(target_id = %target.id, selectors = ?hint.rules.selectors, "Learned extraction rules");
                }
                Classification {
                    verdict: Verdict {
                        has_promotion: parsed.has_promotion,
                        promotion_text: parsed.promotion_text.filter(|_| parsed.has_promotion),
                        confidence: parsed.confidence,
                        detection_tier: DetectionTier::ModelBased,
                        category: Some(parsed.category),
                        ..base
                    },
                    learned_hint,
                    review: None,
                }
            }
            Err(e) => {
                warn!(
                    target_id = %target.id,
                    tier = "unresolved",
                    error = %e,
                    "Model tier failed, verdict unresolved"
                );
                Classification {
                    review: Some(ReviewRequest {
                        target_id: target.id.clone(),
                        observation_date,
                        url: target.url.clone(),
                        reason: e.to_string(),
                        content_ref,
                    }),
                    verdict: base,
                    learned_hint: None,
                }
            }
        }
    }

    async fn ask_model(
        &self,
        request: &ModelRequest,
        deadline: Option<Instant>,
    ) -> Result<ParsedVerdict, ModelError> {
        let model = &self.model;
        let timeout = self.model_timeout;
        self.retry
            .run("classify", deadline, ModelError::is_retryable, || async move {
                let raw = tokio::time::timeout(timeout, model.classify(request))
                    .await
                    .map_err(|_| ModelError::Timeout)??;
                Ok(parse_verdict(&raw)?)
            })
            .await
    }
}

/// Tier 1: cached selectors plus keywords. `None` means inconclusive.
fn rule_based(target: &Target, content: &AcquiredContent) -> Option<(String, Vec<&'static str>)> {
    let hint = target.capability_hint.as_ref()?;
    if hint.rules.is_empty() || content.format != ContentFormat::Html {
        return None;
    }
    let text = rules::extract_text(&content.body, &hint.rules)?;
    let hits = rules::keyword_hits(&text);
    if hits.is_empty() {
        debug!(target_id = %target.id, "Cached rules matched text without promotional keywords");
        return None;
    }
    let text = truncate_to_char_boundary(&text, rules::MAX_PROMOTION_TEXT).to_string();
    Some((text, hits))
}

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use tracing::warn;

use promotrack_common::{ContentRef, TargetId};

/// A day whose classification could not be resolved automatically.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewRequest {
    pub target_id: TargetId,
    pub observation_date: NaiveDate,
    pub url: String,
    pub reason: String,
    pub content_ref: Option<ContentRef>,
}

/// Outbound channel for manual-review requests.
#[async_trait]
pub trait ReviewNotifier: Send + Sync {
    async fn request_review(&self, request: &ReviewRequest) -> anyhow::Result<()>;
}

/// Drops every request.
pub struct NoopNotifier;

#[async_trait]
impl ReviewNotifier for NoopNotifier {
    async fn request_review(&self, _request: &ReviewRequest) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Emits each request as a structured warning.
pub struct LogNotifier;

#[async_trait]
impl ReviewNotifier for LogNotifier {
    async fn request_review(&self, request: &ReviewRequest) -> anyhow::Result<()> {
        warn!(
            target_id = %request.target_id,
            date = %request.observation_date,
            url = request.url.as_str(),
            content_ref = request.content_ref.as_ref().map(|c| c.as_str()).unwrap_or(""),
            reason = request.reason.as_str(),
            "Classification unresolved, manual review requested"
        );
        Ok(())
    }
}

use thiserror::Error;

use promotrack_common::PromoTrackError;
use promotrack_store::StoreError;

use crate::acquirer::{FetchError, RenderError};
use crate::orchestrator::PipelineState;

/// Both acquisition tiers failed for a target.
#[derive(Debug, Error)]
#[error(
    "acquisition failed (direct: {}; fallback: {fallback})",
    direct_summary(.direct, .robots_blocked)
)]
pub struct AcquireError {
    /// `None` when the direct tier was never attempted.
    pub direct: Option<FetchError>,
    pub robots_blocked: bool,
    #[source]
    pub fallback: RenderError,
}

fn direct_summary(direct: &Option<FetchError>, robots_blocked: &bool) -> String {
    match direct {
        Some(e) => e.to_string(),
        None if *robots_blocked => "skipped, disallowed by robots.txt".to_string(),
        None => "skipped".to_string(),
    }
}

impl AcquireError {
    /// Only the fallback service decides; direct-tier failures are never retried.
    pub fn is_transient(&self) -> bool {
        self.fallback.transient
    }

    pub fn kind(&self) -> &'static str {
        if self.fallback.transient {
            "fallback_transient"
        } else {
            "fallback_failed"
        }
    }
}

/// Why a single target's pipeline stopped early.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("invalid target: {0}")]
    InvalidTarget(#[from] PromoTrackError),

    #[error(transparent)]
    Acquire(#[from] AcquireError),

    #[error("persistence failed: {0}")]
    Store(#[from] StoreError),

    #[error("run deadline reached before {0} stage")]
    DeadlineExceeded(PipelineState),
}

impl StageError {
    pub fn kind(&self) -> &'static str {
        match self {
            StageError::InvalidTarget(_) => "invalid_target",
            StageError::Acquire(e) => e.kind(),
            StageError::Store(_) => "store",
            StageError::DeadlineExceeded(_) => "deadline_exceeded",
        }
    }
}

/// Conditions that abort the whole run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("target registry unavailable: {0}")]
    Registry(#[source] StoreError),

    #[error("worker pool cannot start: concurrency must be at least 1")]
    InvalidConcurrency,
}

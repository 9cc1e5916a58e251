use async_trait::async_trait;
use chrono::{DateTime, Utc};

use promotrack_common::{
    AcquisitionRecord, CapabilityHint, ContentRef, Prediction, Target, TargetId, Verdict,
};

use crate::error::Result;

/// Read side of the target registry, plus the classifier's single-field hint update.
#[async_trait]
pub trait TargetRegistry: Send + Sync {
    async fn list_enabled(&self) -> Result<Vec<Target>>;

    /// Replace the target's capability hint unless a newer one is already stored.
    async fn update_hint(&self, target_id: &TargetId, hint: &CapabilityHint) -> Result<()>;
}

/// Content blobs. `put` with an existing key overwrites it.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<ContentRef>;
    async fn get(&self, content_ref: &ContentRef) -> Result<Vec<u8>>;
}

/// Acquisition, verdict and prediction records. Every write is keyed and
/// safe to repeat.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Keyed by `(target_id, run_timestamp)`.
    async fn upsert_acquisition(&self, record: &AcquisitionRecord) -> Result<()>;

    async fn acquisitions_for(&self, target_id: &TargetId) -> Result<Vec<AcquisitionRecord>>;

    /// Delete acquisition records whose retention has lapsed. Returns rows removed.
    async fn purge_expired_acquisitions(&self, now: DateTime<Utc>) -> Result<u64>;

    /// Keyed by `(target_id, observation_date)`; a repeat replaces the row.
    async fn upsert_verdict(&self, verdict: &Verdict) -> Result<()>;

    /// All verdicts for a target, oldest observation first.
    async fn verdicts_for(&self, target_id: &TargetId) -> Result<Vec<Verdict>>;

    /// Store `prediction` as the target's current prediction and demote the
    /// previous one in the same commit. Keyed by `(target_id, issued_at)`.
    async fn commit_prediction(&self, prediction: &Prediction) -> Result<()>;

    async fn current_prediction(&self, target_id: &TargetId) -> Result<Option<Prediction>>;

    /// Every prediction version for a target, oldest first.
    async fn predictions_for(&self, target_id: &TargetId) -> Result<Vec<Prediction>>;
}

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use promotrack_common::{
    AcquisitionRecord, CapabilityHint, Prediction, Target, TargetId, Verdict,
};

use crate::error::{Result, StoreError};
use crate::traits::{RecordStore, TargetRegistry};

#[derive(Default)]
struct Tables {
    targets: BTreeMap<TargetId, Target>,
    acquisitions: BTreeMap<(TargetId, DateTime<Utc>), AcquisitionRecord>,
    verdicts: BTreeMap<(TargetId, NaiveDate), Verdict>,
    predictions: BTreeMap<(TargetId, DateTime<Utc>), Prediction>,
}

/// In-process registry and record store with the same keying rules as Postgres.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    hint_writes: Mutex<HashMap<TargetId, u32>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_targets(targets: impl IntoIterator<Item = Target>) -> Self {
        let store = Self::new();
        for target in targets {
            store.register_target(target);
        }
        store
    }

    /// Insert or replace a target, standing in for the onboarding flow.
    pub fn register_target(&self, target: Target) {
        let mut tables = self.lock();
        tables.targets.insert(target.id.clone(), target);
    }

    pub fn target(&self, id: &TargetId) -> Option<Target> {
        self.lock().targets.get(id).cloned()
    }

    /// Number of hint writes applied for a target.
    pub fn hint_writes(&self, id: &TargetId) -> u32 {
        self.hint_writes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .copied()
            .unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl TargetRegistry for MemoryStore {
    async fn list_enabled(&self) -> Result<Vec<Target>> {
        Ok(self
            .lock()
            .targets
            .values()
            .filter(|t| t.enabled)
            .cloned()
            .collect())
    }

    async fn update_hint(&self, target_id: &TargetId, hint: &CapabilityHint) -> Result<()> {
        let mut tables = self.lock();
        let target = tables
            .targets
            .get_mut(target_id)
            .ok_or_else(|| StoreError::NotFound(format!("target {target_id}")))?;

        let newer_stored = target
            .capability_hint
            .as_ref()
            .is_some_and(|existing| existing.learned_at > hint.learned_at);
        if !newer_stored {
            target.capability_hint = Some(hint.clone());
            *self
                .hint_writes
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .entry(target_id.clone())
                .or_default() += 1;
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn upsert_acquisition(&self, record: &AcquisitionRecord) -> Result<()> {
        if !record.is_consistent() {
            return Err(StoreError::Corrupt(format!(
                "successful acquisition for {} without content",
                record.target_id
            )));
        }
        self.lock().acquisitions.insert(
            (record.target_id.clone(), record.run_timestamp),
            record.clone(),
        );
        Ok(())
    }

    async fn acquisitions_for(&self, target_id: &TargetId) -> Result<Vec<AcquisitionRecord>> {
        Ok(self
            .lock()
            .acquisitions
            .values()
            .filter(|r| &r.target_id == target_id)
            .cloned()
            .collect())
    }

    async fn purge_expired_acquisitions(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut tables = self.lock();
        let before = tables.acquisitions.len();
        tables.acquisitions.retain(|_, r| r.expires_at > now);
        Ok((before - tables.acquisitions.len()) as u64)
    }

    async fn upsert_verdict(&self, verdict: &Verdict) -> Result<()> {
        self.lock().verdicts.insert(
            (verdict.target_id.clone(), verdict.observation_date),
            verdict.clone(),
        );
        Ok(())
    }

    async fn verdicts_for(&self, target_id: &TargetId) -> Result<Vec<Verdict>> {
        Ok(self
            .lock()
            .verdicts
            .values()
            .filter(|v| &v.target_id == target_id)
            .cloned()
            .collect())
    }

    async fn commit_prediction(&self, prediction: &Prediction) -> Result<()> {
        let mut tables = self.lock();
        for existing in tables
            .predictions
            .values_mut()
            .filter(|p| p.target_id == prediction.target_id)
        {
            existing.is_current = false;
        }
        let mut row = prediction.clone();
        row.is_current = true;
        tables
            .predictions
            .insert((row.target_id.clone(), row.issued_at), row);
        Ok(())
    }

    async fn current_prediction(&self, target_id: &TargetId) -> Result<Option<Prediction>> {
        Ok(self
            .lock()
            .predictions
            .values()
            .find(|p| &p.target_id == target_id && p.is_current)
            .cloned())
    }

    async fn predictions_for(&self, target_id: &TargetId) -> Result<Vec<Prediction>> {
        Ok(self
            .lock()
            .predictions
            .values()
            .filter(|p| &p.target_id == target_id)
            .cloned()
            .collect())
    }
}

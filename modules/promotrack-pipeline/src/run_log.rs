//! Run log: persisted JSON timeline of every stage transition in a run.
//!
//! Each run produces a single `{DATA_DIR}/runs/{run_id}.json` file containing
//! an ordered list of events with timestamps, followed by the run summary.

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::info;

use promotrack_common::{AcquisitionTier, DetectionTier, ForecastMethod, TargetId};

use crate::orchestrator::{PipelineState, RunSummary};

pub struct RunLog {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    events: Vec<RunEvent>,
    seq: u32,
}

#[derive(Debug, Serialize)]
struct RunEvent {
    seq: u32,
    ts: DateTime<Utc>,
    #[serde(flatten)]
    kind: EventKind,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    StageEntered {
        target_id: TargetId,
        state: PipelineState,
    },
    Acquired {
        target_id: TargetId,
        tier: AcquisitionTier,
        cost_units: u32,
        content_bytes: usize,
        robots_blocked: bool,
        duration_ms: u64,
    },
    AcquisitionFailed {
        target_id: TargetId,
        robots_blocked: bool,
        error: String,
    },
    Classified {
        target_id: TargetId,
        detection_tier: DetectionTier,
        has_promotion: bool,
        confidence: f64,
    },
    HintLearned {
        target_id: TargetId,
        selectors: Vec<String>,
    },
    ReviewRequested {
        target_id: TargetId,
        reason: String,
    },
    ForecastSkipped {
        target_id: TargetId,
    },
    Forecast {
        target_id: TargetId,
        method: ForecastMethod,
        predicted_date: NaiveDate,
        sample_size: u32,
    },
    TargetFailed {
        target_id: TargetId,
        state: PipelineState,
        error: String,
    },
    TargetSkipped {
        target_id: TargetId,
    },
}

impl RunLog {
    pub fn new(run_id: String, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            started_at,
            events: Vec::new(),
            seq: 0,
        }
    }

    pub fn log(&mut self, kind: EventKind) {
        self.events.push(RunEvent {
            seq: self.seq,
            ts: Utc::now(),
            kind,
        });
        self.seq += 1;
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Serialize the run log to JSON under `dir`.
    /// Returns the file path on success.
    pub fn save(&self, dir: &Path, summary: &RunSummary) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.json", self.run_id));

        let output = SerializedRunLog {
            run_id: &self.run_id,
            started_at: self.started_at,
            finished_at: summary.finished_at,
            summary,
            events: &self.events,
        };

        std::fs::write(&path, serde_json::to_string_pretty(&output)?)?;
        info!(path = %path.display(), events = self.events.len(), "Run log saved");

        Ok(path)
    }
}

#[derive(Serialize)]
struct SerializedRunLog<'a> {
    run_id: &'a str,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    summary: &'a RunSummary,
    events: &'a [RunEvent],
}

//! Fan-out/fan-in over targets: each target runs Acquire → Classify →
//! Forecast sequentially; targets run in parallel up to the concurrency cap.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use promotrack_common::{
    content_key, AcquisitionMeta, AcquisitionRecord, AcquisitionTier, Config, DetectionTier,
    ForecastMethod, Target, TargetId, MAX_RUN_TIMEOUT,
};
use promotrack_store::{BlobStore, RecordStore, TargetRegistry};

use crate::acquirer::Acquirer;
use crate::classifier::Classifier;
use crate::error::{AcquireError, RunError, StageError};
use crate::forecaster;
use crate::notify::ReviewNotifier;
use crate::retry::RetryPolicy;
use crate::run_log::{EventKind, RunLog};

/// Where a target's pipeline is. Stages only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Acquiring,
    Classifying,
    Forecasting,
    Done,
    Failed,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineState::Acquiring => write!(f, "acquiring"),
            PipelineState::Classifying => write!(f, "classifying"),
            PipelineState::Forecasting => write!(f, "forecasting"),
            PipelineState::Done => write!(f, "done"),
            PipelineState::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetOutcome {
    pub target_id: TargetId,
    pub status: OutcomeStatus,
    /// Last stage reached; `Failed` outcomes keep the stage they failed in.
    pub last_state: PipelineState,
    pub acquisition_tier: Option<AcquisitionTier>,
    pub detection_tier: Option<DetectionTier>,
    pub forecast_method: Option<ForecastMethod>,
    pub error: Option<String>,
}

/// Aggregate result of one run. Per-target failures live here; they never
/// fail the run itself.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub succeeded: u32,
    pub failed: u32,
    pub skipped: u32,
    pub per_target_errors: BTreeMap<TargetId, String>,
    pub outcomes: Vec<TargetOutcome>,
}

impl RunSummary {
    pub fn outcome(&self, target_id: &TargetId) -> Option<&TargetOutcome> {
        self.outcomes.iter().find(|o| &o.target_id == target_id)
    }

    fn count_where(&self, pred: impl Fn(&TargetOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(o)).count()
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== PromoTrack Run Complete ===")?;
        writeln!(f, "Run:            {}", self.run_id)?;
        writeln!(
            f,
            "Duration:       {}s",
            (self.finished_at - self.started_at).num_seconds()
        )?;
        writeln!(f, "Targets:        {}", self.outcomes.len())?;
        writeln!(f, "Succeeded:      {}", self.succeeded)?;
        writeln!(f, "Failed:         {}", self.failed)?;
        writeln!(f, "Skipped:        {}", self.skipped)?;
        writeln!(f, "\nAcquisition:")?;
        writeln!(
            f,
            "  Direct:       {}",
            self.count_where(|o| o.acquisition_tier == Some(AcquisitionTier::Direct))
        )?;
        writeln!(
            f,
            "  Fallback:     {}",
            self.count_where(|o| o.acquisition_tier == Some(AcquisitionTier::Fallback))
        )?;
        writeln!(f, "\nClassification:")?;
        writeln!(
            f,
            "  Rule-based:   {}",
            self.count_where(|o| o.detection_tier == Some(DetectionTier::RuleBased))
        )?;
        writeln!(
            f,
            "  Model-based:  {}",
            self.count_where(|o| o.detection_tier == Some(DetectionTier::ModelBased))
        )?;
        writeln!(
            f,
            "  Unresolved:   {}",
            self.count_where(|o| o.detection_tier == Some(DetectionTier::Unresolved))
        )?;
        writeln!(
            f,
            "\nForecasts:      {}",
            self.count_where(|o| o.forecast_method.is_some())
        )?;
        if !self.per_target_errors.is_empty() {
            writeln!(f, "\nErrors:")?;
            for (target_id, error) in &self.per_target_errors {
                writeln!(f, "  {target_id}: {error}")?;
            }
        }
        Ok(())
    }
}

/// Collaborators the orchestrator drives.
pub struct PipelineDeps {
    pub registry: Arc<dyn TargetRegistry>,
    pub records: Arc<dyn RecordStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub acquirer: Acquirer,
    pub classifier: Classifier,
    pub notifier: Arc<dyn ReviewNotifier>,
}

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub concurrency: usize,
    pub run_timeout: Duration,
    pub retry: RetryPolicy,
    /// Whether an unresolved day still triggers a new forecast.
    pub forecast_on_unresolved: bool,
    pub retention_days: i64,
    pub run_log_dir: Option<PathBuf>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            concurrency: 10,
            run_timeout: Duration::from_secs(30 * 60),
            retry: RetryPolicy::default(),
            forecast_on_unresolved: false,
            retention_days: 90,
            run_log_dir: None,
        }
    }
}

impl RunSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            concurrency: config.run_concurrency,
            run_timeout: config.run_timeout,
            retry: RetryPolicy {
                max_attempts: config.retry_max_attempts,
                base_delay: config.retry_base_delay,
                multiplier: config.retry_multiplier,
            },
            forecast_on_unresolved: config.forecast_on_unresolved,
            retention_days: config.acquisition_retention_days,
            run_log_dir: Some(config.data_dir.join("runs")),
        }
    }
}

struct RunContext {
    started_at: DateTime<Utc>,
    deadline: Instant,
    log: Mutex<RunLog>,
}

impl RunContext {
    fn run_date(&self) -> NaiveDate {
        self.started_at.date_naive()
    }

    fn log(&self, kind: EventKind) {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).log(kind);
    }

    fn past_deadline(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

/// Per-target progress, carried through the stages.
struct Progress {
    target_id: TargetId,
    state: PipelineState,
    acquisition_tier: Option<AcquisitionTier>,
    detection_tier: Option<DetectionTier>,
    forecast_method: Option<ForecastMethod>,
}

impl Progress {
    fn new(target_id: TargetId) -> Self {
        Self {
            target_id,
            state: PipelineState::Acquiring,
            acquisition_tier: None,
            detection_tier: None,
            forecast_method: None,
        }
    }

    fn enter(&mut self, state: PipelineState, ctx: &RunContext) {
        self.state = state;
        info!(state = %state, "Stage entered");
        ctx.log(EventKind::StageEntered {
            target_id: self.target_id.clone(),
            state,
        });
    }

    fn outcome(self, status: OutcomeStatus, error: Option<String>) -> TargetOutcome {
        TargetOutcome {
            target_id: self.target_id,
            status,
            last_state: self.state,
            acquisition_tier: self.acquisition_tier,
            detection_tier: self.detection_tier,
            forecast_method: self.forecast_method,
            error,
        }
    }
}

pub struct Orchestrator {
    deps: PipelineDeps,
    settings: RunSettings,
}

impl Orchestrator {
    pub fn new(deps: PipelineDeps, settings: RunSettings) -> Self {
        Self { deps, settings }
    }

    /// Load enabled targets from the registry and run them.
    pub async fn run_enabled(&self) -> Result<RunSummary, RunError> {
        self.run_enabled_matching(&[]).await
    }

    /// Like [`run_enabled`](Self::run_enabled), limited to `only` when non-empty.
    pub async fn run_enabled_matching(&self, only: &[TargetId]) -> Result<RunSummary, RunError> {
        let mut targets = self
            .deps
            .registry
            .list_enabled()
            .await
            .map_err(RunError::Registry)?;
        if !only.is_empty() {
            targets.retain(|t| only.contains(&t.id));
        }
        self.run(targets).await
    }

    pub async fn run(&self, targets: Vec<Target>) -> Result<RunSummary, RunError> {
        self.run_at(targets, Utc::now()).await
    }

    /// Run with an explicit run timestamp, which keys acquisition records,
    /// dates verdicts and versions predictions.
    pub async fn run_at(
        &self,
        targets: Vec<Target>,
        started_at: DateTime<Utc>,
    ) -> Result<RunSummary, RunError> {
        if self.settings.concurrency == 0 {
            return Err(RunError::InvalidConcurrency);
        }

        let run_id = Uuid::new_v4().to_string();
        let targets = dedup_targets(targets);
        info!(
            run_id = run_id.as_str(),
            targets = targets.len(),
            concurrency = self.settings.concurrency,
            "Run starting"
        );

        let now = Instant::now();
        let ctx = RunContext {
            started_at,
            deadline: now
                .checked_add(self.settings.run_timeout.min(MAX_RUN_TIMEOUT))
                .unwrap_or(now),
            log: Mutex::new(RunLog::new(run_id.clone(), started_at)),
        };

        let outcomes: Vec<TargetOutcome> = stream::iter(targets)
            .map(|target| self.process(target, &ctx))
            .buffer_unordered(self.settings.concurrency)
            .collect()
            .await;

        let summary = summarize(run_id, started_at, outcomes);
        info!(
            run_id = summary.run_id.as_str(),
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            "Run complete"
        );

        if let Some(dir) = &self.settings.run_log_dir {
            let log = ctx.log.lock().unwrap_or_else(|e| e.into_inner());
            if let Err(e) = log.save(dir, &summary) {
                warn!(error = %e, "Failed to save run log");
            }
        }

        Ok(summary)
    }

    async fn process(&self, target: Target, ctx: &RunContext) -> TargetOutcome {
        let mut progress = Progress::new(target.id.clone());

        if ctx.past_deadline() {
            info!(target_id = %target.id, "Run deadline reached, target skipped");
            ctx.log(EventKind::TargetSkipped {
                target_id: target.id.clone(),
            });
            return progress.outcome(OutcomeStatus::Skipped, None);
        }

        let span = info_span!("target", target_id = %target.id);
        match self.pipeline(&target, ctx, &mut progress).instrument(span).await {
            Ok(()) => {
                progress.enter(PipelineState::Done, ctx);
                progress.outcome(OutcomeStatus::Succeeded, None)
            }
            Err(e) => {
                warn!(
                    target_id = %target.id,
                    state = %progress.state,
                    kind = e.kind(),
                    error = %e,
                    "Target pipeline failed"
                );
                ctx.log(EventKind::TargetFailed {
                    target_id: target.id.clone(),
                    state: progress.state,
                    error: e.to_string(),
                });
                progress.outcome(OutcomeStatus::Failed, Some(e.to_string()))
            }
        }
    }

    async fn pipeline(
        &self,
        target: &Target,
        ctx: &RunContext,
        progress: &mut Progress,
    ) -> Result<(), StageError> {
        // --- Acquire ---
        progress.enter(PipelineState::Acquiring, ctx);
        target.validate()?;

        let stage_started = Instant::now();
        let acquirer = &self.deps.acquirer;
        let acquired = self
            .settings
            .retry
            .run(
                "acquire",
                Some(ctx.deadline),
                AcquireError::is_transient,
                move || acquirer.acquire(target),
            )
            .await;

        let meta = |tier: AcquisitionTier, cost_units: u32, robots_blocked: bool| AcquisitionMeta {
            target_id: target.id.clone(),
            run_timestamp: ctx.started_at,
            tier_used: tier,
            cost_units,
            duration_ms: stage_started.elapsed().as_millis() as u64,
            robots_blocked,
            retention_days: self.settings.retention_days,
        };

        let acquired = match acquired {
            Ok(acquired) => acquired,
            Err(e) => {
                let record = AcquisitionRecord::failed(
                    meta(AcquisitionTier::Fallback, 0, e.robots_blocked),
                    e.kind(),
                );
                if let Err(store_err) = self.deps.records.upsert_acquisition(&record).await {
                    warn!(error = %store_err, "Failed to record failed acquisition");
                }
                ctx.log(EventKind::AcquisitionFailed {
                    target_id: target.id.clone(),
                    robots_blocked: e.robots_blocked,
                    error: e.to_string(),
                });
                return Err(e.into());
            }
        };

        let key = content_key(&target.id, ctx.run_date(), acquired.format);
        let content_ref = self.deps.blobs.put(&key, acquired.body.as_bytes()).await?;
        let record = AcquisitionRecord::succeeded(
            meta(acquired.tier, acquired.cost_units, acquired.robots_blocked),
            content_ref.clone(),
            acquired.body.len() as u64,
        );
        self.deps.records.upsert_acquisition(&record).await?;
        progress.acquisition_tier = Some(acquired.tier);
        ctx.log(EventKind::Acquired {
            target_id: target.id.clone(),
            tier: acquired.tier,
            cost_units: acquired.cost_units,
            content_bytes: acquired.body.len(),
            robots_blocked: acquired.robots_blocked,
            duration_ms: record.duration_ms,
        });

        // --- Classify ---
        progress.enter(PipelineState::Classifying, ctx);
        if ctx.past_deadline() {
            return Err(StageError::DeadlineExceeded(PipelineState::Classifying));
        }

        let classification = self
            .deps
            .classifier
            .classify(
                target,
                &acquired,
                Some(content_ref),
                ctx.run_date(),
                Some(ctx.deadline),
            )
            .await;
        let verdict = &classification.verdict;
        self.deps.records.upsert_verdict(verdict).await?;
        progress.detection_tier = Some(verdict.detection_tier);
        ctx.log(EventKind::Classified {
            target_id: target.id.clone(),
            detection_tier: verdict.detection_tier,
            has_promotion: verdict.has_promotion,
            confidence: verdict.confidence,
        });

        if let Some(hint) = &classification.learned_hint {
            match self.deps.registry.update_hint(&target.id, hint).await {
                Ok(()) => ctx.log(EventKind::HintLearned {
                    target_id: target.id.clone(),
                    selectors: hint.rules.selectors.clone(),
                }),
                Err(e) => warn!(error = %e, "Failed to store learned hint"),
            }
        }

        if let Some(review) = &classification.review {
            if let Err(e) = self.deps.notifier.request_review(review).await {
                warn!(error = %e, "Failed to send review request");
            }
            ctx.log(EventKind::ReviewRequested {
                target_id: target.id.clone(),
                reason: review.reason.clone(),
            });
        }

        if verdict.detection_tier == DetectionTier::Unresolved && !self.settings.forecast_on_unresolved
        {
            info!("Unresolved verdict, forecast skipped");
            ctx.log(EventKind::ForecastSkipped {
                target_id: target.id.clone(),
            });
            return Ok(());
        }

        // --- Forecast ---
        progress.enter(PipelineState::Forecasting, ctx);
        if ctx.past_deadline() {
            return Err(StageError::DeadlineExceeded(PipelineState::Forecasting));
        }

        let history = self.deps.records.verdicts_for(&target.id).await?;
        let prediction = forecaster::forecast(&target.id, &history, ctx.started_at);
        self.deps.records.commit_prediction(&prediction).await?;
        progress.forecast_method = Some(prediction.method);
        info!(
            method = %prediction.method,
            predicted = %prediction.predicted_date,
            sample_size = prediction.sample_size,
            "Prediction committed"
        );
        ctx.log(EventKind::Forecast {
            target_id: target.id.clone(),
            method: prediction.method,
            predicted_date: prediction.predicted_date,
            sample_size: prediction.sample_size,
        });

        Ok(())
    }
}

/// Keep the first occurrence of each target id.
fn dedup_targets(targets: Vec<Target>) -> Vec<Target> {
    let mut seen = HashSet::new();
    targets
        .into_iter()
        .filter(|t| {
            let fresh = seen.insert(t.id.clone());
            if !fresh {
                warn!(target_id = %t.id, "Duplicate target in run, ignoring");
            }
            fresh
        })
        .collect()
}

fn summarize(run_id: String, started_at: DateTime<Utc>, outcomes: Vec<TargetOutcome>) -> RunSummary {
    let mut summary = RunSummary {
        run_id,
        started_at,
        finished_at: Utc::now(),
        succeeded: 0,
        failed: 0,
        skipped: 0,
        per_target_errors: BTreeMap::new(),
        outcomes: Vec::new(),
    };
    for outcome in outcomes {
        match outcome.status {
            OutcomeStatus::Succeeded => summary.succeeded += 1,
            OutcomeStatus::Skipped => summary.skipped += 1,
            OutcomeStatus::Failed => {
                summary.failed += 1;
                if let Some(error) = &outcome.error {
                    summary
                        .per_target_errors
                        .insert(outcome.target_id.clone(), error.clone());
                }
            }
        }
        summary.outcomes.push(outcome);
    }
    summary
        .outcomes
        .sort_by(|a, b| a.target_id.cmp(&b.target_id));
    summary
}

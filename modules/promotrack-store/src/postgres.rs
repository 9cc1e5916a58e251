// Postgres persistence for targets and pipeline records.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use promotrack_common::{
    AcquisitionRecord, CapabilityHint, ContentRef, Prediction, Target, TargetId, Verdict,
};

use crate::error::{Result, StoreError};
use crate::traits::{RecordStore, TargetRegistry};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

#[derive(Debug, sqlx::FromRow)]
struct TargetRow {
    id: String,
    url: String,
    name: Option<String>,
    capability_hint: Option<serde_json::Value>,
    enabled: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct AcquisitionRow {
    target_id: String,
    run_timestamp: DateTime<Utc>,
    tier_used: String,
    success: bool,
    content_ref: Option<String>,
    cost_units: i32,
    error_kind: Option<String>,
    duration_ms: i64,
    content_length: i64,
    robots_blocked: bool,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct VerdictRow {
    target_id: String,
    observation_date: NaiveDate,
    has_promotion: bool,
    promotion_text: Option<String>,
    confidence: f64,
    detection_tier: String,
    category: Option<String>,
    content_ref: Option<String>,
    observed_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct PredictionRow {
    target_id: String,
    issued_at: DateTime<Utc>,
    predicted_date: NaiveDate,
    lower_bound: NaiveDate,
    upper_bound: NaiveDate,
    method: String,
    sample_size: i32,
    confidence: f64,
    gap_days: Option<f64>,
    is_current: bool,
}

fn corrupt(e: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(e.to_string())
}

impl TryFrom<TargetRow> for Target {
    type Error = StoreError;

    fn try_from(row: TargetRow) -> Result<Self> {
        let capability_hint = row
            .capability_hint
            .map(serde_json::from_value::<CapabilityHint>)
            .transpose()?;
        Ok(Target {
            id: TargetId::new(row.id),
            url: row.url,
            name: row.name,
            capability_hint,
            enabled: row.enabled,
        })
    }
}

impl TryFrom<AcquisitionRow> for AcquisitionRecord {
    type Error = StoreError;

    fn try_from(row: AcquisitionRow) -> Result<Self> {
        Ok(AcquisitionRecord {
            target_id: TargetId::new(row.target_id),
            run_timestamp: row.run_timestamp,
            tier_used: row.tier_used.parse().map_err(corrupt)?,
            success: row.success,
            content_ref: row.content_ref.map(ContentRef),
            cost_units: u32::try_from(row.cost_units).map_err(corrupt)?,
            error_kind: row.error_kind,
            duration_ms: u64::try_from(row.duration_ms).map_err(corrupt)?,
            content_length: u64::try_from(row.content_length).map_err(corrupt)?,
            robots_blocked: row.robots_blocked,
            expires_at: row.expires_at,
        })
    }
}

impl TryFrom<VerdictRow> for Verdict {
    type Error = StoreError;

    fn try_from(row: VerdictRow) -> Result<Self> {
        Ok(Verdict {
            target_id: TargetId::new(row.target_id),
            observation_date: row.observation_date,
            has_promotion: row.has_promotion,
            promotion_text: row.promotion_text,
            confidence: row.confidence,
            detection_tier: row.detection_tier.parse().map_err(corrupt)?,
            category: row
                .category
                .map(|c| c.parse())
                .transpose()
                .map_err(corrupt)?,
            content_ref: row.content_ref.map(ContentRef),
            observed_at: row.observed_at,
        })
    }
}

impl TryFrom<PredictionRow> for Prediction {
    type Error = StoreError;

    fn try_from(row: PredictionRow) -> Result<Self> {
        Ok(Prediction {
            target_id: TargetId::new(row.target_id),
            issued_at: row.issued_at,
            predicted_date: row.predicted_date,
            lower_bound: row.lower_bound,
            upper_bound: row.upper_bound,
            method: row.method.parse().map_err(corrupt)?,
            sample_size: u32::try_from(row.sample_size).map_err(corrupt)?,
            confidence: row.confidence,
            gap_days: row.gap_days,
            is_current: row.is_current,
        })
    }
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Store migrations applied");
        Ok(())
    }

    /// Insert or refresh a target row. Registration itself belongs to onboarding;
    /// this exists for seeding and tests.
    pub async fn register_target(&self, target: &Target) -> Result<()> {
        let hint = target
            .capability_hint
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        sqlx::query(
            r#"
            INSERT INTO targets (id, url, name, capability_hint, enabled)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
            SET url = EXCLUDED.url,
                name = EXCLUDED.name,
                capability_hint = EXCLUDED.capability_hint,
                enabled = EXCLUDED.enabled
            "#,
        )
        .bind(target.id.as_str())
        .bind(&target.url)
        .bind(&target.name)
        .bind(hint)
        .bind(target.enabled)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn collect<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

#[async_trait]
impl TargetRegistry for PgStore {
    async fn list_enabled(&self) -> Result<Vec<Target>> {
        let rows = sqlx::query_as::<_, TargetRow>(
            r#"
            SELECT id, url, name, capability_hint, enabled
            FROM targets
            WHERE enabled
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        collect(rows)
    }

    async fn update_hint(&self, target_id: &TargetId, hint: &CapabilityHint) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE targets
            SET capability_hint = $2
            WHERE id = $1
              AND (capability_hint IS NULL
                   OR (capability_hint->>'learned_at')::timestamptz <= $3)
            "#,
        )
        .bind(target_id.as_str())
        .bind(serde_json::to_value(hint)?)
        .bind(hint.learned_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM targets WHERE id = $1)")
                    .bind(target_id.as_str())
                    .fetch_one(&self.pool)
                    .await?;
            if !exists {
                return Err(StoreError::NotFound(format!("target {target_id}")));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn upsert_acquisition(&self, r: &AcquisitionRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO acquisition_records
                (target_id, run_timestamp, tier_used, success, content_ref, cost_units,
                 error_kind, duration_ms, content_length, robots_blocked, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (target_id, run_timestamp) DO UPDATE
            SET tier_used = EXCLUDED.tier_used,
                success = EXCLUDED.success,
                content_ref = EXCLUDED.content_ref,
                cost_units = EXCLUDED.cost_units,
                error_kind = EXCLUDED.error_kind,
                duration_ms = EXCLUDED.duration_ms,
                content_length = EXCLUDED.content_length,
                robots_blocked = EXCLUDED.robots_blocked,
                expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(r.target_id.as_str())
        .bind(r.run_timestamp)
        .bind(r.tier_used.to_string())
        .bind(r.success)
        .bind(r.content_ref.as_ref().map(ContentRef::as_str))
        .bind(i32::try_from(r.cost_units).unwrap_or(i32::MAX))
        .bind(&r.error_kind)
        .bind(i64::try_from(r.duration_ms).unwrap_or(i64::MAX))
        .bind(i64::try_from(r.content_length).unwrap_or(i64::MAX))
        .bind(r.robots_blocked)
        .bind(r.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn acquisitions_for(&self, target_id: &TargetId) -> Result<Vec<AcquisitionRecord>> {
        let rows = sqlx::query_as::<_, AcquisitionRow>(
            r#"
            SELECT * FROM acquisition_records
            WHERE target_id = $1
            ORDER BY run_timestamp
            "#,
        )
        .bind(target_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        collect(rows)
    }

    async fn purge_expired_acquisitions(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM acquisition_records WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn upsert_verdict(&self, v: &Verdict) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO verdicts
                (target_id, observation_date, has_promotion, promotion_text, confidence,
                 detection_tier, category, content_ref, observed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (target_id, observation_date) DO UPDATE
            SET has_promotion = EXCLUDED.has_promotion,
                promotion_text = EXCLUDED.promotion_text,
                confidence = EXCLUDED.confidence,
                detection_tier = EXCLUDED.detection_tier,
                category = EXCLUDED.category,
                content_ref = EXCLUDED.content_ref,
                observed_at = EXCLUDED.observed_at
            "#,
        )
        .bind(v.target_id.as_str())
        .bind(v.observation_date)
        .bind(v.has_promotion)
        .bind(&v.promotion_text)
        .bind(v.confidence)
        .bind(v.detection_tier.to_string())
        .bind(v.category.map(|c| c.to_string()))
        .bind(v.content_ref.as_ref().map(ContentRef::as_str))
        .bind(v.observed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn verdicts_for(&self, target_id: &TargetId) -> Result<Vec<Verdict>> {
        let rows = sqlx::query_as::<_, VerdictRow>(
            r#"
            SELECT * FROM verdicts
            WHERE target_id = $1
            ORDER BY observation_date
            "#,
        )
        .bind(target_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        collect(rows)
    }

    async fn commit_prediction(&self, p: &Prediction) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // Demote first so the partial unique index never sees two current rows.
        sqlx::query(
            r#"
            UPDATE predictions
            SET is_current = FALSE
            WHERE target_id = $1 AND is_current AND issued_at <> $2
            "#,
        )
        .bind(p.target_id.as_str())
        .bind(p.issued_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO predictions
                (target_id, issued_at, predicted_date, lower_bound, upper_bound, method,
                 sample_size, confidence, gap_days, is_current)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, TRUE)
            ON CONFLICT (target_id, issued_at) DO UPDATE
            SET predicted_date = EXCLUDED.predicted_date,
                lower_bound = EXCLUDED.lower_bound,
                upper_bound = EXCLUDED.upper_bound,
                method = EXCLUDED.method,
                sample_size = EXCLUDED.sample_size,
                confidence = EXCLUDED.confidence,
                gap_days = EXCLUDED.gap_days,
                is_current = TRUE
            "#,
        )
        .bind(p.target_id.as_str())
        .bind(p.issued_at)
        .bind(p.predicted_date)
        .bind(p.lower_bound)
        .bind(p.upper_bound)
        .bind(p.method.to_string())
        .bind(i32::try_from(p.sample_size).unwrap_or(i32::MAX))
        .bind(p.confidence)
        .bind(p.gap_days)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn current_prediction(&self, target_id: &TargetId) -> Result<Option<Prediction>> {
        let row = sqlx::query_as::<_, PredictionRow>(
            r#"
            SELECT * FROM predictions
            WHERE target_id = $1 AND is_current
            "#,
        )
        .bind(target_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Prediction::try_from).transpose()
    }

    async fn predictions_for(&self, target_id: &TargetId) -> Result<Vec<Prediction>> {
        let rows = sqlx::query_as::<_, PredictionRow>(
            r#"
            SELECT * FROM predictions
            WHERE target_id = $1
            ORDER BY issued_at
            "#,
        )
        .bind(target_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        collect(rows)
    }
}

use std::sync::LazyLock;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::MAX_RETENTION_DAYS;
use crate::error::PromoTrackError;

static SLUG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9](?:[a-z0-9_-]{0,62}[a-z0-9])?$").unwrap());

// --- Targets ---

/// Stable slug identifying a monitored site. Immutable once assigned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(String);

impl TargetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_valid_slug(&self) -> bool {
        SLUG.is_match(&self.0)
    }
}

impl std::fmt::Display for TargetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TargetId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// CSS selectors that locate promotional copy on a target's page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionRules {
    pub selectors: Vec<String>,
}

impl ExtractionRules {
    pub fn is_empty(&self) -> bool {
        self.selectors.is_empty()
    }
}

/// Cached extraction rules learned by the classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityHint {
    pub rules: ExtractionRules,
    pub learned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub id: TargetId,
    pub url: String,
    /// Human-readable name, used as context for the classification model.
    pub name: Option<String>,
    pub capability_hint: Option<CapabilityHint>,
    pub enabled: bool,
}

impl Target {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: TargetId::new(id),
            url: url.into(),
            name: None,
            capability_hint: None,
            enabled: true,
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.id.as_str())
    }

    /// Reject targets whose config can never succeed.
    pub fn validate(&self) -> Result<(), PromoTrackError> {
        if !self.id.is_valid_slug() {
            return Err(PromoTrackError::Validation(format!(
                "invalid target id {:?}",
                self.id.as_str()
            )));
        }
        let parsed = url::Url::parse(&self.url).map_err(|e| {
            PromoTrackError::Validation(format!("target {} has invalid url: {e}", self.id))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(PromoTrackError::Validation(format!(
                "target {} url must be http(s) with a host",
                self.id
            )));
        }
        Ok(())
    }
}

// --- Acquisition ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionTier {
    Direct,
    Fallback,
}

impl std::fmt::Display for AcquisitionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AcquisitionTier::Direct => write!(f, "direct"),
            AcquisitionTier::Fallback => write!(f, "fallback"),
        }
    }
}

impl std::str::FromStr for AcquisitionTier {
    type Err = PromoTrackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(AcquisitionTier::Direct),
            "fallback" => Ok(AcquisitionTier::Fallback),
            other => Err(unknown_variant("acquisition tier", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentFormat {
    Html,
    Markdown,
}

impl ContentFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ContentFormat::Html => "html",
            ContentFormat::Markdown => "md",
        }
    }
}

/// Opaque pointer to a stored content blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentRef(pub String);

impl ContentRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Blob key for a target's content on a given day. Same day, same key.
pub fn content_key(target_id: &TargetId, run_date: NaiveDate, format: ContentFormat) -> String {
    format!(
        "scrapes/{}/{}.{}",
        target_id,
        run_date.format("%Y-%m-%d"),
        format.extension()
    )
}

/// Outcome of one target's acquisition stage within a run.
///
/// Built through [`AcquisitionRecord::succeeded`] or [`AcquisitionRecord::failed`]
/// so that a successful record always points at stored content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionRecord {
    pub target_id: TargetId,
    pub run_timestamp: DateTime<Utc>,
    pub tier_used: AcquisitionTier,
    pub success: bool,
    pub content_ref: Option<ContentRef>,
    pub cost_units: u32,
    pub error_kind: Option<String>,
    pub duration_ms: u64,
    pub content_length: u64,
    pub robots_blocked: bool,
    pub expires_at: DateTime<Utc>,
}

/// Fields shared by successful and failed acquisition records.
#[derive(Debug, Clone)]
pub struct AcquisitionMeta {
    pub target_id: TargetId,
    pub run_timestamp: DateTime<Utc>,
    pub tier_used: AcquisitionTier,
    pub cost_units: u32,
    pub duration_ms: u64,
    pub robots_blocked: bool,
    pub retention_days: i64,
}

impl AcquisitionRecord {
    pub fn succeeded(meta: AcquisitionMeta, content_ref: ContentRef, content_length: u64) -> Self {
        Self::build(meta, Some(content_ref), content_length, None)
    }

    pub fn failed(meta: AcquisitionMeta, error_kind: impl Into<String>) -> Self {
        Self::build(meta, None, 0, Some(error_kind.into()))
    }

    fn build(
        meta: AcquisitionMeta,
        content_ref: Option<ContentRef>,
        content_length: u64,
        error_kind: Option<String>,
    ) -> Self {
        Self {
            expires_at: meta.run_timestamp
                + Duration::days(meta.retention_days.clamp(1, MAX_RETENTION_DAYS)),
            target_id: meta.target_id,
            run_timestamp: meta.run_timestamp,
            tier_used: meta.tier_used,
            success: content_ref.is_some(),
            content_ref,
            cost_units: meta.cost_units,
            error_kind,
            duration_ms: meta.duration_ms,
            content_length,
            robots_blocked: meta.robots_blocked,
        }
    }

    pub fn is_consistent(&self) -> bool {
        !self.success || self.content_ref.is_some()
    }
}

// --- Classification ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionTier {
    RuleBased,
    ModelBased,
    Unresolved,
}

impl std::fmt::Display for DetectionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectionTier::RuleBased => write!(f, "rule_based"),
            DetectionTier::ModelBased => write!(f, "model_based"),
            DetectionTier::Unresolved => write!(f, "unresolved"),
        }
    }
}

impl std::str::FromStr for DetectionTier {
    type Err = PromoTrackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rule_based" => Ok(DetectionTier::RuleBased),
            "model_based" => Ok(DetectionTier::ModelBased),
            "unresolved" => Ok(DetectionTier::Unresolved),
            other => Err(unknown_variant("detection tier", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PromotionCategory {
    SitewideSale,
    CategorySale,
    Coupon,
    FreeShipping,
    None,
}

impl std::fmt::Display for PromotionCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PromotionCategory::SitewideSale => write!(f, "sitewide_sale"),
            PromotionCategory::CategorySale => write!(f, "category_sale"),
            PromotionCategory::Coupon => write!(f, "coupon"),
            PromotionCategory::FreeShipping => write!(f, "free_shipping"),
            PromotionCategory::None => write!(f, "none"),
        }
    }
}

impl std::str::FromStr for PromotionCategory {
    type Err = PromoTrackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sitewide_sale" => Ok(PromotionCategory::SitewideSale),
            "category_sale" => Ok(PromotionCategory::CategorySale),
            "coupon" => Ok(PromotionCategory::Coupon),
            "free_shipping" => Ok(PromotionCategory::FreeShipping),
            "none" => Ok(PromotionCategory::None),
            other => Err(unknown_variant("promotion category", other)),
        }
    }
}

/// One observation per target per calendar day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub target_id: TargetId,
    pub observation_date: NaiveDate,
    pub has_promotion: bool,
    pub promotion_text: Option<String>,
    /// Always within [0, 1].
    pub confidence: f64,
    pub detection_tier: DetectionTier,
    pub category: Option<PromotionCategory>,
    pub content_ref: Option<ContentRef>,
    pub observed_at: DateTime<Utc>,
}

// --- Forecasting ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastMethod {
    CalendarHeuristic,
    WeightedAverage,
    SeasonalModelLight,
    SeasonalModelFull,
}

impl ForecastMethod {
    /// Method tier for a given number of historical sale events.
    pub fn for_event_count(n: usize) -> Self {
        match n {
            0..=4 => ForecastMethod::CalendarHeuristic,
            5..=9 => ForecastMethod::WeightedAverage,
            10..=29 => ForecastMethod::SeasonalModelLight,
            _ => ForecastMethod::SeasonalModelFull,
        }
    }

    /// Half-width of the prediction interval in days.
    pub fn bound_days(&self) -> i64 {
        match self {
            ForecastMethod::CalendarHeuristic => 14,
            ForecastMethod::WeightedAverage => 10,
            ForecastMethod::SeasonalModelLight => 7,
            ForecastMethod::SeasonalModelFull => 5,
        }
    }

    pub fn confidence(&self) -> f64 {
        match self {
            ForecastMethod::CalendarHeuristic => 0.30,
            ForecastMethod::WeightedAverage => 0.60,
            ForecastMethod::SeasonalModelLight => 0.75,
            ForecastMethod::SeasonalModelFull => 0.85,
        }
    }
}

impl std::fmt::Display for ForecastMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ForecastMethod::CalendarHeuristic => write!(f, "calendar_heuristic"),
            ForecastMethod::WeightedAverage => write!(f, "weighted_average"),
            ForecastMethod::SeasonalModelLight => write!(f, "seasonal_model_light"),
            ForecastMethod::SeasonalModelFull => write!(f, "seasonal_model_full"),
        }
    }
}

impl std::str::FromStr for ForecastMethod {
    type Err = PromoTrackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "calendar_heuristic" => Ok(ForecastMethod::CalendarHeuristic),
            "weighted_average" => Ok(ForecastMethod::WeightedAverage),
            "seasonal_model_light" => Ok(ForecastMethod::SeasonalModelLight),
            "seasonal_model_full" => Ok(ForecastMethod::SeasonalModelFull),
            other => Err(unknown_variant("forecast method", other)),
        }
    }
}

/// A versioned forecast. `issued_at` is the version key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub target_id: TargetId,
    pub issued_at: DateTime<Utc>,
    pub predicted_date: NaiveDate,
    pub lower_bound: NaiveDate,
    pub upper_bound: NaiveDate,
    pub method: ForecastMethod,
    pub sample_size: u32,
    pub confidence: f64,
    pub gap_days: Option<f64>,
    pub is_current: bool,
}

fn unknown_variant(kind: &str, value: &str) -> PromoTrackError {
    PromoTrackError::Validation(format!("unknown {kind}: {value:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_validation() {
        assert!(TargetId::from("acme-shoes").is_valid_slug());
        assert!(TargetId::from("a").is_valid_slug());
        assert!(!TargetId::from("").is_valid_slug());
        assert!(!TargetId::from("Acme Shoes").is_valid_slug());
        assert!(!TargetId::from("trailing-").is_valid_slug());
    }

    #[test]
    fn target_validation_rejects_bad_urls() {
        assert!(Target::new("acme", "https://acme.example/sale").validate().is_ok());
        assert!(Target::new("acme", "ftp://acme.example").validate().is_err());
        assert!(Target::new("acme", "not a url").validate().is_err());
        assert!(Target::new("", "https://acme.example").validate().is_err());
    }

    #[test]
    fn method_tiers_by_event_count() {
        assert_eq!(ForecastMethod::for_event_count(0), ForecastMethod::CalendarHeuristic);
        assert_eq!(ForecastMethod::for_event_count(4), ForecastMethod::CalendarHeuristic);
        assert_eq!(ForecastMethod::for_event_count(5), ForecastMethod::WeightedAverage);
        assert_eq!(ForecastMethod::for_event_count(9), ForecastMethod::WeightedAverage);
        assert_eq!(ForecastMethod::for_event_count(10), ForecastMethod::SeasonalModelLight);
        assert_eq!(ForecastMethod::for_event_count(29), ForecastMethod::SeasonalModelLight);
        assert_eq!(ForecastMethod::for_event_count(30), ForecastMethod::SeasonalModelFull);
    }

    #[test]
    fn successful_acquisition_always_has_content() {
        let meta = AcquisitionMeta {
            target_id: TargetId::from("acme"),
            run_timestamp: Utc::now(),
            tier_used: AcquisitionTier::Direct,
            cost_units: 0,
            duration_ms: 120,
            robots_blocked: false,
            retention_days: 90,
        };
        let ok = AcquisitionRecord::succeeded(meta.clone(), ContentRef("k".into()), 10);
        assert!(ok.success && ok.is_consistent());
        assert_eq!(ok.expires_at - ok.run_timestamp, Duration::days(90));

        let failed = AcquisitionRecord::failed(meta, "timeout");
        assert!(!failed.success && failed.content_ref.is_none());
        assert_eq!(failed.error_kind.as_deref(), Some("timeout"));
    }

    #[test]
    fn out_of_range_retention_is_clamped() {
        let meta = AcquisitionMeta {
            target_id: TargetId::from("acme"),
            run_timestamp: Utc::now(),
            tier_used: AcquisitionTier::Fallback,
            cost_units: 0,
            duration_ms: 5,
            robots_blocked: false,
            retention_days: 9_999_999_999_999,
        };
        let record = AcquisitionRecord::failed(meta.clone(), "fallback_failed");
        assert_eq!(
            record.expires_at - record.run_timestamp,
            Duration::days(MAX_RETENTION_DAYS)
        );

        let record = AcquisitionRecord::failed(
            AcquisitionMeta {
                retention_days: -3,
                ..meta
            },
            "fallback_failed",
        );
        assert_eq!(record.expires_at - record.run_timestamp, Duration::days(1));
    }

    #[test]
    fn content_key_is_stable_per_day() {
        let day = NaiveDate::from_ymd_opt(2025, 11, 28).unwrap();
        assert_eq!(
            content_key(&TargetId::from("acme"), day, ContentFormat::Html),
            "scrapes/acme/2025-11-28.html"
        );
    }

    #[test]
    fn enum_text_round_trips() {
        for m in [
            ForecastMethod::CalendarHeuristic,
            ForecastMethod::WeightedAverage,
            ForecastMethod::SeasonalModelLight,
            ForecastMethod::SeasonalModelFull,
        ] {
            assert_eq!(m.to_string().parse::<ForecastMethod>().unwrap(), m);
        }
        assert!("bogus".parse::<DetectionTier>().is_err());
    }
}

use chrono::{Duration, NaiveDate, TimeZone, Utc};

use promotrack_common::{
    AcquisitionMeta, AcquisitionRecord, AcquisitionTier, CapabilityHint, ContentRef,
    DetectionTier, ExtractionRules, ForecastMethod, Prediction, Target, TargetId, Verdict,
};
use promotrack_store::{MemoryStore, RecordStore, TargetRegistry};

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn verdict(id: &str, date: NaiveDate, has_promotion: bool) -> Verdict {
    Verdict {
        target_id: TargetId::from(id),
        observation_date: date,
        has_promotion,
        promotion_text: has_promotion.then(|| "20% off".to_string()),
        confidence: 0.8,
        detection_tier: DetectionTier::RuleBased,
        category: None,
        content_ref: Some(ContentRef("scrapes/acme/x.html".into())),
        observed_at: Utc::now(),
    }
}

fn prediction(id: &str, issued_hour: u32) -> Prediction {
    let date = day(2026, 1, 1);
    Prediction {
        target_id: TargetId::from(id),
        issued_at: Utc.with_ymd_and_hms(2025, 12, 1, issued_hour, 0, 0).unwrap(),
        predicted_date: date,
        lower_bound: date - Duration::days(14),
        upper_bound: date + Duration::days(14),
        method: ForecastMethod::CalendarHeuristic,
        sample_size: 0,
        confidence: 0.3,
        gap_days: None,
        is_current: true,
    }
}

#[tokio::test]
async fn verdict_upsert_keeps_one_row_per_day_with_latest_data() {
    let store = MemoryStore::new();
    let date = day(2025, 11, 28);

    store.upsert_verdict(&verdict("acme", date, false)).await.unwrap();
    store.upsert_verdict(&verdict("acme", date, true)).await.unwrap();

    let rows = store.verdicts_for(&TargetId::from("acme")).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].has_promotion);
}

#[tokio::test]
async fn verdicts_come_back_oldest_first() {
    let store = MemoryStore::new();
    store.upsert_verdict(&verdict("acme", day(2025, 3, 2), true)).await.unwrap();
    store.upsert_verdict(&verdict("acme", day(2025, 1, 5), true)).await.unwrap();
    store.upsert_verdict(&verdict("other", day(2025, 2, 1), true)).await.unwrap();

    let rows = store.verdicts_for(&TargetId::from("acme")).await.unwrap();
    let dates: Vec<_> = rows.iter().map(|v| v.observation_date).collect();
    assert_eq!(dates, vec![day(2025, 1, 5), day(2025, 3, 2)]);
}

#[tokio::test]
async fn exactly_one_current_prediction_after_many_commits() {
    let store = MemoryStore::new();
    let id = TargetId::from("acme");
    assert!(store.current_prediction(&id).await.unwrap().is_none());

    for hour in 0..5 {
        store.commit_prediction(&prediction("acme", hour)).await.unwrap();
    }
    // Duplicate delivery of the same version.
    store.commit_prediction(&prediction("acme", 4)).await.unwrap();

    let all = store.predictions_for(&id).await.unwrap();
    assert_eq!(all.len(), 5);
    assert_eq!(all.iter().filter(|p| p.is_current).count(), 1);

    let current = store.current_prediction(&id).await.unwrap().unwrap();
    assert_eq!(current.issued_at, prediction("acme", 4).issued_at);
}

#[tokio::test]
async fn hint_update_skips_stale_hints() {
    let store = MemoryStore::with_targets([Target::new("acme", "https://acme.example")]);
    let id = TargetId::from("acme");
    let newer = CapabilityHint {
        rules: ExtractionRules { selectors: vec!["#promo".into()] },
        learned_at: Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 0).unwrap(),
    };
    let older = CapabilityHint {
        rules: ExtractionRules { selectors: vec![".old".into()] },
        learned_at: Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
    };

    store.update_hint(&id, &newer).await.unwrap();
    store.update_hint(&id, &older).await.unwrap();

    let target = store.target(&id).unwrap();
    assert_eq!(target.capability_hint.unwrap().rules.selectors, vec!["#promo"]);
    assert_eq!(store.hint_writes(&id), 1);
}

#[tokio::test]
async fn hint_update_for_unknown_target_fails() {
    let store = MemoryStore::new();
    let hint = CapabilityHint {
        rules: ExtractionRules::default(),
        learned_at: Utc::now(),
    };
    assert!(store.update_hint(&TargetId::from("ghost"), &hint).await.is_err());
}

#[tokio::test]
async fn list_enabled_skips_disabled_targets() {
    let mut disabled = Target::new("gone", "https://gone.example");
    disabled.enabled = false;
    let store = MemoryStore::with_targets([Target::new("acme", "https://acme.example"), disabled]);

    let enabled = store.list_enabled().await.unwrap();
    assert_eq!(enabled.len(), 1);
    assert_eq!(enabled[0].id.as_str(), "acme");
}

#[tokio::test]
async fn purge_removes_only_expired_acquisitions() {
    let store = MemoryStore::new();
    let now = Utc::now();
    let meta = |days_ago: i64| AcquisitionMeta {
        target_id: TargetId::from("acme"),
        run_timestamp: now - Duration::days(days_ago),
        tier_used: AcquisitionTier::Direct,
        cost_units: 0,
        duration_ms: 10,
        robots_blocked: false,
        retention_days: 90,
    };

    store
        .upsert_acquisition(&AcquisitionRecord::failed(meta(120), "timeout"))
        .await
        .unwrap();
    store
        .upsert_acquisition(&AcquisitionRecord::succeeded(
            meta(3),
            ContentRef("scrapes/acme/a.html".into()),
            42,
        ))
        .await
        .unwrap();

    assert_eq!(store.purge_expired_acquisitions(now).await.unwrap(), 1);
    let left = store.acquisitions_for(&TargetId::from("acme")).await.unwrap();
    assert_eq!(left.len(), 1);
    assert!(left[0].success);
}

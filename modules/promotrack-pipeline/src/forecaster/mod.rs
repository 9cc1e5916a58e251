//! Next-sale forecasting with model choice driven by how much history exists.
//!
//! | events | method                 | bound  |
//! |--------|------------------------|--------|
//! | < 5    | calendar heuristic     | ±14 d  |
//! | 5–9    | recency-weighted gap   | ±10 d  |
//! | 10–29  | yearly seasonal model  | ±7 d   |
//! | ≥ 30   | yearly + weekly model  | ±5 d   |
//!
//! Pure computation over already-persisted verdicts.

pub mod calendar;
pub mod regression;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::debug;

use promotrack_common::{ForecastMethod, Prediction, TargetId, Verdict};

use regression::Seasonality;

/// Collapse verdicts into sale events keyed by start date. Promotion days on
/// consecutive calendar dates belong to the same event.
pub fn collapse_events(verdicts: &[Verdict]) -> Vec<NaiveDate> {
    let mut days: Vec<NaiveDate> = verdicts
        .iter()
        .filter(|v| v.has_promotion)
        .map(|v| v.observation_date)
        .collect();
    days.sort();
    days.dedup();

    let mut events = Vec::new();
    let mut previous: Option<NaiveDate> = None;
    for day in days {
        let continues = previous.is_some_and(|p| (day - p).num_days() == 1);
        if !continues {
            events.push(day);
        }
        previous = Some(day);
    }
    events
}

/// Gaps in days between consecutive event starts.
pub fn event_gaps(events: &[NaiveDate]) -> Vec<f64> {
    events
        .windows(2)
        .map(|w| (w[1] - w[0]).num_days() as f64)
        .collect()
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

/// Linearly recency-weighted mean: the i-th oldest gap has weight i.
pub fn weighted_gap(gaps: &[f64]) -> Option<f64> {
    if gaps.is_empty() {
        return None;
    }
    let (sum, weights) = gaps
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(sum, weights), (i, gap)| {
            let w = (i + 1) as f64;
            (sum + w * gap, weights + w)
        });
    Some(sum / weights)
}

/// `last + k·gap` for the smallest `k ≥ 1` that lands strictly after `today`.
pub fn advance_past(last: NaiveDate, gap_days: f64, today: NaiveDate) -> NaiveDate {
    let gap = gap_days.max(1.0);
    let elapsed = (today - last).num_days();
    let k = if elapsed < 0 {
        1.0
    } else {
        (elapsed as f64 / gap).floor() + 1.0
    };
    let mut offset = (k * gap).round() as i64;
    if offset <= elapsed {
        offset = elapsed + 1;
    }
    last + Duration::days(offset)
}

/// Compute a new current prediction from a target's verdict history.
pub fn forecast(target_id: &TargetId, verdicts: &[Verdict], issued_at: DateTime<Utc>) -> Prediction {
    let today = issued_at.date_naive();
    let events = collapse_events(verdicts);
    let gaps = event_gaps(&events);
    let tier = ForecastMethod::for_event_count(events.len());

    let (method, predicted_date, gap_days) = match (tier, events.last()) {
        (ForecastMethod::CalendarHeuristic, _) | (_, None) => {
            let (date, gap) = calendar_heuristic(&events, &gaps, today);
            (ForecastMethod::CalendarHeuristic, date, gap)
        }
        (ForecastMethod::WeightedAverage, Some(&last)) => weighted(last, &gaps, today),
        (ForecastMethod::SeasonalModelLight, Some(&last)) => {
            seasonal(tier, Seasonality::Yearly, &events, last, &gaps, today)
        }
        (ForecastMethod::SeasonalModelFull, Some(&last)) => {
            seasonal(tier, Seasonality::YearlyAndWeekly, &events, last, &gaps, today)
        }
    };

    let bound = Duration::days(method.bound_days());
    debug!(
        target_id = %target_id,
        events = events.len(),
        method = %method,
        predicted = %predicted_date,
        "Forecast computed"
    );

    Prediction {
        target_id: target_id.clone(),
        issued_at,
        predicted_date,
        lower_bound: predicted_date - bound,
        upper_bound: predicted_date + bound,
        method,
        sample_size: events.len() as u32,
        confidence: method.confidence(),
        gap_days,
        is_current: true,
    }
}

fn calendar_heuristic(
    events: &[NaiveDate],
    gaps: &[f64],
    today: NaiveDate,
) -> (NaiveDate, Option<f64>) {
    match (events.last(), median(gaps)) {
        (Some(&last), Some(gap)) if events.len() >= 2 => {
            let candidate = advance_past(last, gap, today);
            let radius = ForecastMethod::CalendarHeuristic.bound_days();
            let date = calendar::snap_to_window(candidate, radius, today).unwrap_or(candidate);
            (date, Some(gap))
        }
        _ => (calendar::next_window_after(today), None),
    }
}

fn weighted(last: NaiveDate, gaps: &[f64], today: NaiveDate) -> (ForecastMethod, NaiveDate, Option<f64>) {
    let gap = weighted_gap(gaps).unwrap_or(1.0);
    (
        ForecastMethod::WeightedAverage,
        advance_past(last, gap, today),
        Some(gap),
    )
}

fn seasonal(
    method: ForecastMethod,
    seasonality: Seasonality,
    events: &[NaiveDate],
    last: NaiveDate,
    gaps: &[f64],
    today: NaiveDate,
) -> (ForecastMethod, NaiveDate, Option<f64>) {
    match regression::predict_gap(events, seasonality) {
        Some(gap) => (method, advance_past(last, gap, today), Some(gap)),
        None => {
            debug!(method = %method, "Seasonal fit unusable, using weighted average");
            weighted(last, gaps, today)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use promotrack_common::{DetectionTier, TargetId};

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn verdict(date: NaiveDate, has_promotion: bool) -> Verdict {
        Verdict {
            target_id: TargetId::from("acme"),
            observation_date: date,
            has_promotion,
            promotion_text: None,
            confidence: 0.9,
            detection_tier: DetectionTier::RuleBased,
            category: None,
            content_ref: None,
            observed_at: Utc::now(),
        }
    }

    #[test]
    fn consecutive_days_collapse_to_one_event() {
        let verdicts = vec![
            verdict(day(2025, 1, 1), true),
            verdict(day(2025, 1, 2), true),
            verdict(day(2025, 1, 3), true),
            verdict(day(2025, 1, 4), false),
            verdict(day(2025, 2, 10), true),
            verdict(day(2025, 2, 12), true),
        ];
        assert_eq!(
            collapse_events(&verdicts),
            vec![day(2025, 1, 1), day(2025, 2, 10), day(2025, 2, 12)]
        );
    }

    #[test]
    fn weighting_favours_recent_gaps() {
        let gap = weighted_gap(&[10.0, 20.0, 30.0]).unwrap();
        assert!((gap - (10.0 + 40.0 + 90.0) / 6.0).abs() < 1e-9);
    }

    #[test]
    fn median_even_and_odd() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn advance_past_handles_fresh_and_stale_history() {
        let today = day(2025, 6, 1);
        assert_eq!(advance_past(day(2025, 5, 20), 30.0, today), day(2025, 6, 19));
        let stale = today - Duration::days(200);
        let next = advance_past(stale, 45.0, today);
        assert!(next > today);
        assert_eq!(next, stale + Duration::days(225));
    }

    #[test]
    fn no_history_uses_next_window() {
        let issued = DateTime::parse_from_rfc3339("2025-03-01T06:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let p = forecast(&TargetId::from("acme"), &[], issued);
        assert_eq!(p.method, ForecastMethod::CalendarHeuristic);
        assert_eq!(p.predicted_date, day(2025, 3, 20));
        assert_eq!(p.lower_bound, day(2025, 3, 6));
        assert_eq!(p.sample_size, 0);
        assert!(p.gap_days.is_none());
    }
}

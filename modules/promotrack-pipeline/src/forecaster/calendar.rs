use chrono::{Datelike, Duration, NaiveDate, Weekday};

/// Recurring retail sale windows for a given year, in date order.
pub fn seasonal_windows(year: i32) -> Vec<NaiveDate> {
    let fixed = [(1, 1), (3, 20), (6, 24), (8, 15), (11, 11), (12, 26)];
    let mut windows: Vec<NaiveDate> = fixed
        .iter()
        .filter_map(|&(m, d)| NaiveDate::from_ymd_opt(year, m, d))
        .collect();

    if let Some(black_friday) = black_friday(year) {
        windows.push(black_friday);
        windows.push(black_friday + Duration::days(3));
    }
    windows.sort();
    windows
}

/// The day after the fourth Thursday of November.
pub fn black_friday(year: i32) -> Option<NaiveDate> {
    NaiveDate::from_weekday_of_month_opt(year, 11, Weekday::Thu, 4).map(|d| d + Duration::days(1))
}

/// First seasonal window strictly after `today`.
pub fn next_window_after(today: NaiveDate) -> NaiveDate {
    (today.year()..=today.year() + 1)
        .flat_map(seasonal_windows)
        .find(|d| *d > today)
        .unwrap_or_else(|| today + Duration::days(1))
}

/// Window closest to `candidate`, if one lies within `radius_days` and after `today`.
pub fn snap_to_window(candidate: NaiveDate, radius_days: i64, today: NaiveDate) -> Option<NaiveDate> {
    (candidate.year() - 1..=candidate.year() + 1)
        .flat_map(seasonal_windows)
        .filter(|d| *d > today && (*d - candidate).num_days().abs() <= radius_days)
        .min_by_key(|d| (*d - candidate).num_days().abs())
}

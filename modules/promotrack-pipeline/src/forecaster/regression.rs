//! Seasonal least-squares model of the gap between sale events.
//!
//! Each gap is regressed on Fourier terms of the date its starting event
//! began, so the model can learn e.g. that a November sale is followed by a
//! short gap and a spring sale by a long one.

use std::f64::consts::TAU;

use chrono::{Datelike, NaiveDate};

const RIDGE: f64 = 1e-3;
const PIVOT_EPSILON: f64 = 1e-12;
const DAYS_PER_YEAR: f64 = 365.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seasonality {
    /// Intercept plus one yearly harmonic.
    Yearly,
    /// Intercept, two yearly harmonics and a weekly harmonic.
    YearlyAndWeekly,
}

impl Seasonality {
    fn features(&self, date: NaiveDate) -> Vec<f64> {
        let year_phase = TAU * f64::from(date.ordinal0()) / DAYS_PER_YEAR;
        let mut row = vec![1.0, year_phase.sin(), year_phase.cos()];
        if *self == Seasonality::YearlyAndWeekly {
            let week_phase = TAU * f64::from(date.weekday().num_days_from_monday()) / 7.0;
            row.extend([
                (2.0 * year_phase).sin(),
                (2.0 * year_phase).cos(),
                week_phase.sin(),
                week_phase.cos(),
            ]);
        }
        row
    }
}

/// Predicted gap in days following `events.last()`, or `None` when the fit is
/// degenerate or the prediction is not a usable gap.
pub fn predict_gap(events: &[NaiveDate], seasonality: Seasonality) -> Option<f64> {
    let last = *events.last()?;
    let samples: Vec<(Vec<f64>, f64)> = events
        .windows(2)
        .map(|w| (seasonality.features(w[0]), (w[1] - w[0]).num_days() as f64))
        .collect();
    if samples.is_empty() {
        return None;
    }

    let beta = fit(&samples)?;
    let gap: f64 = seasonality
        .features(last)
        .iter()
        .zip(&beta)
        .map(|(x, b)| x * b)
        .sum();

    (gap.is_finite() && gap >= 1.0).then_some(gap)
}

/// Ridge-regularised normal equations; the intercept is not penalised.
fn fit(samples: &[(Vec<f64>, f64)]) -> Option<Vec<f64>> {
    let k = samples.first()?.0.len();
    let mut xtx = vec![vec![0.0; k]; k];
    let mut xty = vec![0.0; k];

    for (x, y) in samples {
        for i in 0..k {
            xty[i] += x[i] * y;
            for j in 0..k {
                xtx[i][j] += x[i] * x[j];
            }
        }
    }
    for (i, row) in xtx.iter_mut().enumerate().skip(1) {
        row[i] += RIDGE * samples.len() as f64;
    }

    solve(xtx, xty)
}

/// Gaussian elimination with partial pivoting.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&r1, &r2| a[r1][col].abs().total_cmp(&a[r2][col].abs()))?;
        if a[pivot][col].abs() < PIVOT_EPSILON {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            for c in col..n {
                a[row][c] -= factor * a[col][c];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|c| a[row][c] * x[c]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    x.iter().all(|v| v.is_finite()).then_some(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn regular(start: NaiveDate, gap: i64, n: usize) -> Vec<NaiveDate> {
        (0..n).map(|i| start + Duration::days(gap * i as i64)).collect()
    }

    #[test]
    fn constant_gaps_are_recovered() {
        let start = NaiveDate::from_ymd_opt(2022, 1, 3).unwrap();
        let events = regular(start, 30, 15);
        let gap = predict_gap(&events, Seasonality::Yearly).unwrap();
        assert!((gap - 30.0).abs() < 1.0, "gap = {gap}");

        let events = regular(start, 21, 40);
        let gap = predict_gap(&events, Seasonality::YearlyAndWeekly).unwrap();
        assert!((gap - 21.0).abs() < 1.0, "gap = {gap}");
    }

    #[test]
    fn solves_small_system() {
        let x = solve(vec![vec![2.0, 1.0], vec![1.0, 3.0]], vec![3.0, 5.0]).unwrap();
        assert!((x[0] - 0.8).abs() < 1e-9);
        assert!((x[1] - 1.4).abs() < 1e-9);
    }

    #[test]
    fn singular_system_is_rejected() {
        assert!(solve(vec![vec![1.0, 2.0], vec![2.0, 4.0]], vec![1.0, 2.0]).is_none());
    }

    #[test]
    fn single_event_has_no_model() {
        let start = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        assert!(predict_gap(&[start], Seasonality::Yearly).is_none());
    }
}

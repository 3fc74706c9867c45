//! Multi-window annualised volatility.
//!
//! Every window is measured on the same 1-minute samples and annualised with
//! the same factor, so a 1h figure and a 30d figure are directly comparable.

use crate::config::{MINUTES_PER_YEAR, SAMPLE_INTERVAL_MINUTES};
use crate::types::{PriceHistoryPoint, VolatilityMap, VolatilityWindow};

/// `sqrt(sampling periods per year)`.
pub fn annualization_factor() -> f64 {
    (MINUTES_PER_YEAR / f64::from(SAMPLE_INTERVAL_MINUTES)).sqrt()
}

/// Log returns between consecutive samples. A pair touching a non-positive or
/// non-finite price is skipped rather than failing the series.
fn log_returns(points: &[PriceHistoryPoint]) -> Vec<f64> {
    points
        .windows(2)
        .filter_map(|pair| {
            let (prev, next) = (pair[0].price, pair[1].price);
            let usable = |p: f64| p.is_finite() && p > 0.0;
            if usable(prev) && usable(next) {
                Some((next / prev).ln())
            } else {
                None
            }
        })
        .collect()
}

/// Sample standard deviation (n - 1). Zero when fewer than two values.
fn sample_std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    variance.sqrt()
}

/// Points whose timestamp lies within `window` of the latest sample.
/// `history` must be sorted by timestamp.
fn trailing(history: &[PriceHistoryPoint], window: VolatilityWindow) -> &[PriceHistoryPoint] {
    let Some(last) = history.last() else {
        return history;
    };
    let cutoff = last.timestamp - i64::from(window.minutes()) * 60;
    let start = history.partition_point(|p| p.timestamp < cutoff);
    &history[start..]
}

/// Annualised volatility of one window. Zero with fewer than two samples.
pub fn window_volatility(history: &[PriceHistoryPoint], window: VolatilityWindow) -> f64 {
    let points = trailing(history, window);
    if points.len() < 2 {
        return 0.0;
    }
    sample_std_dev(&log_returns(points)) * annualization_factor()
}

/// Annualised volatility for each requested window.
pub fn compute_volatility(
    history: &[PriceHistoryPoint],
    windows: &[VolatilityWindow],
) -> VolatilityMap {
    windows
        .iter()
        .map(|&w| (w, window_volatility(history, w)))
        .collect()
}

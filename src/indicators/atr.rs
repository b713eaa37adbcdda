//! Average True Range (ATR) indicator
//!
//! Measures market volatility by calculating the average of true ranges over a period.
//! True Range is the greatest of:
//! - Current High - Current Low
//! - Abs(Current High - Previous Close)
//! - Abs(Current Low - Previous Close)
//!
//! Uses Wilder's smoothing (same as RSI) for the moving average.

use super::moving_average::calculate_rma;

/// True range series; the first bar uses its own close as the previous close
pub fn true_range(high: &[f64], low: &[f64], close: &[f64]) -> Vec<f64> {
    let len = high.len().min(low.len()).min(close.len());

    (0..len)
        .map(|i| {
            let prev_close = if i == 0 { close[0] } else { close[i - 1] };
            (high[i] - low[i])
                .max((high[i] - prev_close).abs())
                .max((low[i] - prev_close).abs())
        })
        .collect()
}

/// Calculate the ATR series for aligned high/low/close series
///
/// Mismatched inputs are truncated to the shortest. Output is aligned with the
/// input; the first `period` values are warm-up averages of an incomplete window.
pub fn calculate_atr(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<f64> {
    calculate_rma(&true_range(high, low, close), period)
}

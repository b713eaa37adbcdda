// Technical indicators module
// Pure series functions: input oldest-first, output aligned with input.
// Empty input always yields empty output.

pub mod atr;
pub mod moving_average;
pub mod rsi;

pub use atr::calculate_atr;
pub use moving_average::{calculate_ema, calculate_macd, calculate_rma, Macd};
pub use rsi::calculate_rsi;

/// Keep only the trailing `n` values of a series
pub fn last_n(series: &[f64], n: usize) -> Vec<f64> {
    series[series.len().saturating_sub(n)..].to_vec()
}

/// Arithmetic mean, zero for an empty slice
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n-1 divisor), zero with fewer than two values
pub fn sample_std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let avg = mean(values);
    let sum_sq: f64 = values.iter().map(|v| (v - avg).powi(2)).sum();
    (sum_sq / (values.len() - 1) as f64).sqrt()
}

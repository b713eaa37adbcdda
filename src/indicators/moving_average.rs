/// Exponential Moving Average (EMA) series
///
/// Seeded with the first value, so a series shorter than `period`
/// still produces one (progressively smoothed) value per element.
pub fn calculate_ema(prices: &[f64], period: usize) -> Vec<f64> {
    let multiplier = 2.0 / (period as f64 + 1.0);

    let mut result = Vec::with_capacity(prices.len());
    for (i, price) in prices.iter().enumerate() {
        let ema = if i == 0 {
            *price
        } else {
            (price - result[i - 1]) * multiplier + result[i - 1]
        };
        result.push(ema);
    }

    result
}

/// Wilder's running moving average (RMA) series
///
/// The first `period` values are the plain mean of what has been seen so far,
/// after which Wilder's smoothing takes over.
pub fn calculate_rma(values: &[f64], period: usize) -> Vec<f64> {
    let period = period.max(1);
    let mut result = Vec::with_capacity(values.len());
    let mut sum = 0.0;

    for (i, value) in values.iter().enumerate() {
        if i < period {
            sum += value;
            result.push(sum / (i + 1) as f64);
        } else {
            let prev = result[i - 1];
            result.push((prev * (period as f64 - 1.0) + value) / period as f64);
        }
    }

    result
}

/// MACD line and its signal line, aligned by index
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Macd {
    pub macd: Vec<f64>,
    pub signal: Vec<f64>,
}

/// MACD(12, 26, 9)
pub fn calculate_macd(prices: &[f64]) -> Macd {
    let fast = calculate_ema(prices, 12);
    let slow = calculate_ema(prices, 26);

    let macd: Vec<f64> = fast.iter().zip(slow.iter()).map(|(f, s)| f - s).collect();
    let signal = calculate_ema(&macd, 9);

    Macd { macd, signal }
}

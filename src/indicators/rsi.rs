use super::moving_average::calculate_rma;

/// Calculate Relative Strength Index (RSI) series
///
/// RSI measures the magnitude of recent price changes to evaluate
/// overbought or oversold conditions.
///
/// Values:
/// - RSI > 70: Overbought
/// - RSI < 30: Oversold
///
/// Gains and losses are smoothed with Wilder's RMA. The output has the same
/// length as the input; the first `period` values are warm-up values computed
/// from an incomplete window. A window with neither gains nor losses reads 50.
pub fn calculate_rsi(prices: &[f64], period: usize) -> Vec<f64> {
    let mut gains = vec![0.0; prices.len()];
    let mut losses = vec![0.0; prices.len()];

    for i in 1..prices.len() {
        let change = prices[i] - prices[i - 1];
        if change > 0.0 {
            gains[i] = change;
        } else {
            losses[i] = -change;
        }
    }

    let avg_gains = calculate_rma(&gains, period);
    let avg_losses = calculate_rma(&losses, period);

    avg_gains
        .iter()
        .zip(avg_losses.iter())
        .map(|(&gain, &loss)| {
            if loss == 0.0 {
                if gain == 0.0 {
                    50.0
                } else {
                    100.0
                }
            } else {
                let rs = gain / loss;
                100.0 - (100.0 / (1.0 + rs))
            }
        })
        .collect()
}

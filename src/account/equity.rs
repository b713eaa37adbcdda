use std::collections::VecDeque;

use crate::indicators::{mean, sample_std_dev};

/// Samples needed before a Sharpe ratio is reported
const MIN_SHARPE_SAMPLES: usize = 3;

/// Capacity-bounded account value history; the oldest sample is evicted first
#[derive(Debug, Clone)]
pub struct EquityHistory {
    values: VecDeque<f64>,
    capacity: usize,
}

impl EquityHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn values(&self) -> Vec<f64> {
        self.values.iter().copied().collect()
    }
}

/// `(v[i] - v[i-1]) / v[i-1]`, zero where the previous value is zero
pub fn period_returns(values: &[f64]) -> Vec<f64> {
    values
        .windows(2)
        .map(|w| if w[0] == 0.0 { 0.0 } else { (w[1] - w[0]) / w[0] })
        .collect()
}

/// Mean over sample standard deviation of period returns
///
/// Zero with fewer than three samples or when the returns have no dispersion.
pub fn sharpe_ratio(values: &[f64]) -> f64 {
    if values.len() < MIN_SHARPE_SAMPLES {
        return 0.0;
    }

    let returns = period_returns(values);
    // Identical returns can leave a rounding residue in the std dev
    if returns.windows(2).all(|w| w[0] == w[1]) {
        return 0.0;
    }

    let std_dev = sample_std_dev(&returns);
    if std_dev == 0.0 || !std_dev.is_finite() {
        return 0.0;
    }
    mean(&returns) / std_dev
}

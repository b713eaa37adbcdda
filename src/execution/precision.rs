use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::HashMap;

use super::ExecutionError;
use crate::api::{ExchangeInfo, SymbolFilter};

/// Decimal places implied by a tick or step size, e.g. "0.0100" -> 2, "1" -> 0
pub fn calc_precision(step: &str) -> u32 {
    let step = step.trim();
    match step.split_once('.') {
        Some((_, fraction)) => fraction.trim_end_matches('0').len() as u32,
        None => 0,
    }
}

/// Round half away from zero to `dp` places and format with exactly `dp` decimals
pub fn round_to_precision(value: f64, dp: u32) -> Option<String> {
    let mut rounded = Decimal::from_f64(value)?
        .round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(dp);
    Some(rounded.to_string())
}

/// Price and quantity decimal places for one symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SymbolPrecision {
    pub price: u32,
    pub quantity: u32,
}

/// Per-symbol precision rules, read-only once built
#[derive(Debug, Clone, Default)]
pub struct PrecisionTable {
    symbols: HashMap<String, SymbolPrecision>,
}

impl PrecisionTable {
    pub fn from_exchange_info(info: &ExchangeInfo) -> Self {
        let symbols = info
            .symbols
            .iter()
            .map(|s| {
                let mut precision = SymbolPrecision::default();
                for filter in &s.filters {
                    match filter {
                        SymbolFilter::PriceFilter { tick_size } => {
                            precision.price = calc_precision(tick_size)
                        }
                        SymbolFilter::LotSize { step_size } => {
                            precision.quantity = calc_precision(step_size)
                        }
                        SymbolFilter::Other => {}
                    }
                }
                (s.symbol.clone(), precision)
            })
            .collect();

        Self { symbols }
    }

    pub fn insert(&mut self, symbol: &str, precision: SymbolPrecision) {
        self.symbols.insert(symbol.to_string(), precision);
    }

    pub fn get(&self, symbol: &str) -> Result<SymbolPrecision, ExecutionError> {
        self.symbols
            .get(symbol)
            .copied()
            .ok_or_else(|| ExecutionError::UnknownSymbol(symbol.to_string()))
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn format_price(&self, symbol: &str, price: f64) -> Result<String, ExecutionError> {
        let dp = self.get(symbol)?.price;
        format_with(symbol, price, dp)
    }

    pub fn format_quantity(&self, symbol: &str, quantity: f64) -> Result<String, ExecutionError> {
        let dp = self.get(symbol)?.quantity;
        format_with(symbol, quantity, dp)
    }
}

fn format_with(symbol: &str, value: f64, dp: u32) -> Result<String, ExecutionError> {
    round_to_precision(value, dp).ok_or_else(|| ExecutionError::Parse {
        symbol: symbol.to_string(),
        value: value.to_string(),
    })
}

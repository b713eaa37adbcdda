// Order execution and local position state
pub mod order_executor;
pub mod precision;
pub mod reconciler;

pub use order_executor::OrderExecutor;
pub use precision::{calc_precision, round_to_precision, PrecisionTable, SymbolPrecision};
pub use reconciler::{merge_positions, PositionReconciler};

use thiserror::Error;

use crate::api::ExchangeError;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Invalid signal for {coin}: {reason}")]
    InvalidSignal { coin: String, reason: String },

    #[error("No precision rules for {0}")]
    UnknownSymbol(String),

    #[error("Exchange call failed for {symbol}: {source}")]
    Exchange {
        symbol: String,
        #[source]
        source: ExchangeError,
    },

    #[error("Batch order {index} rejected for {symbol}: {code} {msg}")]
    BatchRejected {
        symbol: String,
        index: usize,
        code: i64,
        msg: String,
    },

    #[error("No position returned for {0}")]
    PositionNotFound(String),

    #[error("Invalid number for {symbol}: {value}")]
    Parse { symbol: String, value: String },
}

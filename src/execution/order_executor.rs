use std::sync::Arc;

use super::{ExecutionError, PrecisionTable};
use crate::api::{
    parse_decimal, BatchOrderResult, Exchange, ExchangeError, OrderRequest, OrderSide, OrderType,
};
use crate::models::{to_exchange_symbol, SignalKind, TradeSignal};
use crate::retry::{RetryError, RetryPolicy};

/// Translates trade signals into exchange orders
///
/// Holds no local position state; callers update their records only after a
/// successful return. Order submissions are never retried; setup calls are.
pub struct OrderExecutor {
    exchange: Arc<dyn Exchange>,
    retry: RetryPolicy,
    precisions: PrecisionTable,
}

impl OrderExecutor {
    /// Fetch the precision table and build the executor; failure here is fatal for startup
    pub async fn new(
        exchange: Arc<dyn Exchange>,
        retry: RetryPolicy,
    ) -> Result<Self, RetryError<ExchangeError>> {
        let info = retry.retry(|| exchange.exchange_info()).await?;
        let precisions = PrecisionTable::from_exchange_info(&info);
        tracing::info!(symbols = precisions.len(), "Loaded exchange precision rules");

        Ok(Self::with_precisions(exchange, retry, precisions))
    }

    pub fn with_precisions(
        exchange: Arc<dyn Exchange>,
        retry: RetryPolicy,
        precisions: PrecisionTable,
    ) -> Self {
        Self {
            exchange,
            retry,
            precisions,
        }
    }

    pub fn precisions(&self) -> &PrecisionTable {
        &self.precisions
    }

    /// Open a position with attached stop-loss and take-profit orders
    pub async fn enter(&self, signal: &TradeSignal) -> Result<(), ExecutionError> {
        let (entry_side, exit_side) = match signal.signal {
            SignalKind::BuyToEnter => (OrderSide::Buy, OrderSide::Sell),
            SignalKind::SellToEnter => (OrderSide::Sell, OrderSide::Buy),
            SignalKind::Close => {
                return Err(ExecutionError::InvalidSignal {
                    coin: signal.coin.clone(),
                    reason: "close is not an entry signal".to_string(),
                })
            }
        };
        let symbol = to_exchange_symbol(&signal.coin);

        // Round before touching the exchange so a bad signal leaves no side effects
        let quantity = self.precisions.format_quantity(&symbol, signal.quantity)?;
        let stop_loss = self.precisions.format_price(&symbol, signal.stop_loss)?;
        let profit_target = self.precisions.format_price(&symbol, signal.profit_target)?;
        if quantity.parse::<f64>().map_or(true, |q| q <= 0.0) {
            return Err(ExecutionError::InvalidSignal {
                coin: signal.coin.clone(),
                reason: format!("quantity {} rounds to {}", signal.quantity, quantity),
            });
        }

        self.cancel_all(&symbol).await;

        tracing::info!(symbol = %symbol, leverage = signal.leverage, "Setting leverage");
        self.retry
            .retry(|| self.exchange.set_leverage(&symbol, signal.leverage))
            .await
            .map_err(|e| exchange_failure(&symbol, e))?;

        let orders = vec![
            OrderRequest::market(&symbol, entry_side, quantity.clone())
                .with_client_order_id(client_order_id()),
            OrderRequest::close_position_trigger(
                &symbol,
                exit_side,
                OrderType::StopMarket,
                stop_loss.clone(),
            ),
            OrderRequest::close_position_trigger(
                &symbol,
                exit_side,
                OrderType::TakeProfitMarket,
                profit_target.clone(),
            ),
        ];

        tracing::info!(
            symbol = %symbol,
            side = entry_side.as_str(),
            quantity = %quantity,
            stop_loss = %stop_loss,
            profit_target = %profit_target,
            "Submitting entry with protective orders"
        );

        let results = self
            .exchange
            .create_batch_orders(&orders)
            .await
            .map_err(|source| ExecutionError::Exchange {
                symbol: symbol.clone(),
                source,
            })?;

        for (index, result) in results.iter().enumerate() {
            match result {
                BatchOrderResult::Rejected(e) => {
                    return Err(ExecutionError::BatchRejected {
                        symbol,
                        index,
                        code: e.code,
                        msg: e.msg.clone(),
                    });
                }
                BatchOrderResult::Accepted(ack) => {
                    tracing::debug!(
                        symbol = %symbol,
                        order_id = ack.order_id,
                        index,
                        "Order accepted"
                    );
                }
            }
        }

        tracing::info!(symbol = %symbol, "Entry orders placed");
        Ok(())
    }

    /// Flatten the position for `coin` with a reduce-only market order
    ///
    /// A flat position still has its open orders cancelled and counts as success.
    pub async fn close(&self, coin: &str) -> Result<(), ExecutionError> {
        let symbol = to_exchange_symbol(coin);

        let positions = self
            .retry
            .retry(|| self.exchange.position_risk(Some(&symbol)))
            .await
            .map_err(|e| exchange_failure(&symbol, e))?;

        let position = positions
            .iter()
            .find(|p| p.symbol == symbol)
            .ok_or_else(|| ExecutionError::PositionNotFound(symbol.clone()))?;

        let held = parse_decimal("positionAmt", &position.position_amt).map_err(|_| {
            ExecutionError::Parse {
                symbol: symbol.clone(),
                value: position.position_amt.clone(),
            }
        })?;

        if held == 0.0 {
            tracing::info!(symbol = %symbol, "Position already flat, cancelling open orders only");
            self.cancel_all(&symbol).await;
            return Ok(());
        }

        let side = if held > 0.0 {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        };

        // Round before cancelling so an unusable symbol keeps its protective orders
        let quantity = self.precisions.format_quantity(&symbol, held.abs())?;

        // Protective orders go first so they cannot fire against the closing fill
        self.cancel_all(&symbol).await;

        let order = OrderRequest::market(&symbol, side, quantity.clone())
            .reduce_only()
            .with_client_order_id(client_order_id());

        tracing::info!(
            symbol = %symbol,
            side = side.as_str(),
            quantity = %quantity,
            "Submitting close order"
        );

        let ack = self
            .exchange
            .create_order(&order)
            .await
            .map_err(|source| ExecutionError::Exchange {
                symbol: symbol.clone(),
                source,
            })?;

        tracing::info!(symbol = %symbol, order_id = ack.order_id, "Position closed");
        Ok(())
    }

    /// Cancel every open order for `symbol`, logging instead of failing
    ///
    /// "Nothing to cancel" comes back as an error from the exchange and cannot be
    /// told apart cheaply, so any failure is treated as success.
    async fn cancel_all(&self, symbol: &str) {
        match self
            .retry
            .retry(|| self.exchange.cancel_all_orders(symbol))
            .await
        {
            Ok(()) => tracing::debug!(symbol, "Cancelled open orders"),
            Err(e) => tracing::warn!(symbol, error = %e, "Cancel-all failed, continuing"),
        }
    }
}

fn exchange_failure(symbol: &str, err: RetryError<ExchangeError>) -> ExecutionError {
    tracing::debug!(symbol, error = %err, "Retries exhausted");
    ExecutionError::Exchange {
        symbol: symbol.to_string(),
        source: err.into_last_error(),
    }
}

/// Exchange-safe client order id (alphanumeric, under 36 chars)
fn client_order_id() -> String {
    format!("pt{}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_order_id_format() {
        let id = client_order_id();
        assert!(id.len() <= 36);
        assert!(id.starts_with("pt"));
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(id, client_order_id());
    }
}

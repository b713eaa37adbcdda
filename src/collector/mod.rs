// Market data collection
pub mod market_data;
pub mod mock;

pub use market_data::MarketDataCollector;
pub use mock::MockCollector;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::api::{Exchange, ExchangeError};
use crate::config::AppConfig;
use crate::models::{CoinSnapshot, PositionView};
use crate::retry::RetryError;

/// Source of per-coin market data and exchange positions
#[async_trait]
pub trait MarketCollector: Send + Sync {
    /// Snapshot every coin that could be fetched, keyed by bare coin name
    ///
    /// Coins whose essential data could not be fetched are omitted, never an error.
    async fn fetch_snapshot(&self, coins: &[String]) -> BTreeMap<String, CoinSnapshot>;

    /// Open positions as the exchange reports them, without local enrichment
    async fn fetch_positions(&self) -> Result<Vec<PositionView>, RetryError<ExchangeError>>;

    fn name(&self) -> &str;
}

/// Closed set of collector implementations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CollectorKind {
    #[default]
    Binance,
    Mock,
}

/// Build the collector for `kind`; the mock variant ignores the exchange handle
pub fn build(
    kind: CollectorKind,
    exchange: Arc<dyn Exchange>,
    cfg: &AppConfig,
) -> Box<dyn MarketCollector> {
    match kind {
        CollectorKind::Binance => Box::new(MarketDataCollector::new(exchange, cfg)),
        CollectorKind::Mock => Box::new(MockCollector::new()),
    }
}

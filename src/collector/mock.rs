use async_trait::async_trait;
use std::collections::BTreeMap;

use super::MarketCollector;
use crate::api::ExchangeError;
use crate::models::{CoinSnapshot, IntradaySeries, LongTermSeries, OIFunding, PositionView};
use crate::retry::RetryError;

/// Deterministic BTC/ETH fixture for exercising the decision-maker offline
#[derive(Debug, Clone, Default)]
pub struct MockCollector;

impl MockCollector {
    pub fn new() -> Self {
        Self
    }

    pub fn coins() -> BTreeMap<String, CoinSnapshot> {
        let mut coins = BTreeMap::new();

        coins.insert(
            "BTC".to_string(),
            CoinSnapshot {
                price: 65500.0,
                ema_20: 65320.0,
                macd: 25.0,
                rsi_7: 58.0,
                oi_funding: OIFunding {
                    oi_latest: 1_250_000_000,
                    oi_avg: 1_200_000_000,
                    funding_rate: 0.005,
                },
                intraday: IntradaySeries {
                    prices: vec![
                        65100.5, 65050.0, 65000.0, 65150.5, 65200.0, 65300.0, 65250.5, 65350.0,
                        65450.0, 65500.0,
                    ],
                    ema_20: vec![
                        65150.0, 65130.0, 65100.0, 65110.0, 65130.0, 65160.0, 65180.0, 65220.0,
                        65270.0, 65320.0,
                    ],
                    macd: vec![-50.5, -60.0, -55.0, -40.0, -30.0, -10.0, -5.0, 5.0, 15.0, 25.0],
                    rsi_7: vec![25.0, 22.0, 20.0, 30.0, 35.0, 45.0, 42.0, 50.0, 55.0, 58.0],
                    rsi_14: vec![30.0, 28.0, 27.0, 32.0, 36.0, 42.0, 40.0, 45.0, 48.0, 51.0],
                },
                long_term: LongTermSeries {
                    ema_20: 64000.0,
                    ema_50: 63500.0,
                    atr_3: 800.0,
                    atr_14: 1000.0,
                    volume_current: 150_000_000,
                    volume_average: 120_000_000,
                    macd: vec![50.0, 20.0, -10.0, -5.0, 15.0, 30.0, 45.0, 60.0, 70.0, 75.0],
                    rsi_14: vec![50.0, 48.0, 45.0, 47.0, 51.0, 53.0, 55.0, 58.0, 60.0, 61.0],
                },
            },
        );

        coins.insert(
            "ETH".to_string(),
            CoinSnapshot {
                price: 3520.0,
                ema_20: 3516.0,
                macd: 2.0,
                rsi_7: 51.0,
                oi_funding: OIFunding {
                    oi_latest: 850_000_000,
                    oi_avg: 860_000_000,
                    funding_rate: -0.002,
                },
                intraday: IntradaySeries {
                    prices: vec![
                        3510.0, 3505.0, 3500.0, 3502.0, 3508.0, 3512.0, 3510.0, 3514.0, 3518.0,
                        3520.0,
                    ],
                    ema_20: vec![
                        3515.0, 3514.0, 3512.0, 3511.0, 3511.0, 3511.5, 3511.0, 3512.0, 3514.0,
                        3516.0,
                    ],
                    macd: vec![-5.0, -6.0, -5.5, -4.0, -3.0, -1.0, -0.5, 0.5, 1.5, 2.0],
                    rsi_7: vec![30.0, 28.0, 25.0, 28.0, 35.0, 40.0, 38.0, 44.0, 48.0, 51.0],
                    rsi_14: vec![35.0, 33.0, 30.0, 32.0, 37.0, 40.0, 39.0, 42.0, 45.0, 47.0],
                },
                long_term: LongTermSeries {
                    ema_20: 3450.0,
                    ema_50: 3460.0,
                    atr_3: 50.0,
                    atr_14: 65.0,
                    volume_current: 90_000_000,
                    volume_average: 100_000_000,
                    macd: vec![5.0, 2.0, -1.0, -3.0, -5.0, -4.0, -3.0, -2.0, -1.0, -0.5],
                    rsi_14: vec![51.0, 49.0, 47.0, 46.0, 44.0, 45.0, 46.0, 47.0, 47.5, 48.0],
                },
            },
        );

        coins
    }

    /// One short ETH position, as the exchange would report it
    pub fn positions() -> Vec<PositionView> {
        vec![PositionView {
            symbol: "ETH".to_string(),
            quantity: -2.0,
            entry_price: 3505.0,
            current_price: 3520.0,
            liquidation_price: 3820.45,
            unrealized_pnl: -30.0,
            leverage: 10,
            notional_usd: 7010.0,
            ..Default::default()
        }]
    }
}

#[async_trait]
impl MarketCollector for MockCollector {
    /// Fixture coins that are part of the requested universe
    async fn fetch_snapshot(&self, coins: &[String]) -> BTreeMap<String, CoinSnapshot> {
        Self::coins()
            .into_iter()
            .filter(|(coin, _)| coins.iter().any(|c| c.eq_ignore_ascii_case(coin)))
            .collect()
    }

    async fn fetch_positions(&self) -> Result<Vec<PositionView>, RetryError<ExchangeError>> {
        Ok(Self::positions())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

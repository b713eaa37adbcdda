use async_trait::async_trait;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::MarketCollector;
use crate::api::{parse_decimal, Exchange, ExchangeError, PositionRisk, RawKline};
use crate::config::AppConfig;
use crate::indicators::{
    calculate_atr, calculate_ema, calculate_macd, calculate_rsi, last_n, mean,
};
use crate::models::{
    to_coin, to_exchange_symbol, CoinSnapshot, IntradaySeries, Kline, LongTermSeries, OIFunding,
    PositionView,
};
use crate::retry::{RetryError, RetryPolicy};

/// Short-timeframe series plus the latest values surfaced on the coin snapshot
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IntradayView {
    pub series: IntradaySeries,
    pub ema_20: f64,
    pub macd: f64,
    pub rsi_7: f64,
}

/// Live collector backed by the exchange's public market data endpoints
pub struct MarketDataCollector {
    exchange: Arc<dyn Exchange>,
    retry: RetryPolicy,
    short_interval: String,
    long_interval: String,
    kline_limit: u32,
    series_length: usize,
    oi_period: String,
    oi_limit: u32,
}

impl MarketDataCollector {
    pub fn new(exchange: Arc<dyn Exchange>, cfg: &AppConfig) -> Self {
        Self {
            exchange,
            retry: RetryPolicy::from_config(cfg),
            short_interval: cfg.short_interval.clone(),
            long_interval: cfg.long_interval.clone(),
            kline_limit: cfg.kline_limit,
            series_length: cfg.series_length,
            oi_period: cfg.oi_period.clone(),
            oi_limit: cfg.oi_limit,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Assemble one coin's record; `symbol` carries the quote suffix
    ///
    /// Price and both kline series are required. OI/funding degrades to zeros.
    pub async fn fetch_coin(&self, symbol: &str) -> Result<CoinSnapshot, ExchangeError> {
        let (oi_funding, hard) = tokio::join!(self.fetch_oi_funding(symbol), async {
            tokio::try_join!(
                self.fetch_price(symbol),
                self.fetch_klines(symbol, &self.short_interval),
                self.fetch_klines(symbol, &self.long_interval),
            )
        });
        let (price, short_klines, long_klines) = hard?;

        let closes: Vec<f64> = short_klines.iter().map(|k| k.close).collect();
        let intraday = build_intraday(&closes, self.series_length);
        let long_term = build_long_term(&long_klines, self.series_length);

        Ok(CoinSnapshot {
            price,
            ema_20: intraday.ema_20,
            macd: intraday.macd,
            rsi_7: intraday.rsi_7,
            oi_funding,
            intraday: intraday.series,
            long_term,
        })
    }

    async fn fetch_price(&self, symbol: &str) -> Result<f64, ExchangeError> {
        let ticker = self.exchange.ticker_price(symbol).await?;
        if ticker.symbol != symbol {
            return Err(ExchangeError::SymbolNotFound(symbol.to_string()));
        }
        parse_decimal("price", &ticker.price)
    }

    async fn fetch_klines(
        &self,
        symbol: &str,
        interval: &str,
    ) -> Result<Vec<Kline>, ExchangeError> {
        let raw = self
            .exchange
            .klines(symbol, interval, self.kline_limit)
            .await?;
        raw.iter().map(parse_kline).collect()
    }

    /// Funding rate, current OI and OI history, each read independently
    ///
    /// Any read or parse failure leaves its field at zero.
    async fn fetch_oi_funding(&self, symbol: &str) -> OIFunding {
        let (premium, current, history) = tokio::join!(
            self.exchange.premium_index(symbol),
            self.exchange.open_interest(symbol),
            self.exchange
                .open_interest_hist(symbol, &self.oi_period, self.oi_limit),
        );

        let mut result = OIFunding::default();

        match premium {
            Ok(p) => {
                result.funding_rate =
                    parse_decimal("lastFundingRate", &p.last_funding_rate).unwrap_or(0.0)
            }
            Err(e) => tracing::warn!(symbol, error = %e, "Failed to fetch funding rate"),
        }

        match current {
            Ok(oi) => match parse_decimal("openInterest", &oi.open_interest) {
                Ok(value) => result.oi_latest = value.round() as i64,
                Err(e) => tracing::warn!(symbol, error = %e, "Unparseable open interest"),
            },
            Err(e) => tracing::warn!(symbol, error = %e, "Failed to fetch open interest"),
        }

        match history {
            Ok(points) if !points.is_empty() => {
                let values: Vec<f64> = points
                    .iter()
                    .map(|p| parse_decimal("sumOpenInterest", &p.sum_open_interest).unwrap_or(0.0))
                    .collect();
                result.oi_avg = mean(&values).round() as i64;
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(symbol, error = %e, "Failed to fetch open interest history"),
        }

        result
    }
}

#[async_trait]
impl MarketCollector for MarketDataCollector {
    async fn fetch_snapshot(&self, coins: &[String]) -> BTreeMap<String, CoinSnapshot> {
        let tasks = coins.iter().map(|coin| async move {
            let symbol = to_exchange_symbol(coin);
            let result = self.retry.retry(|| self.fetch_coin(&symbol)).await;
            (symbol, result)
        });

        let mut snapshot = BTreeMap::new();
        for (symbol, result) in join_all(tasks).await {
            match result {
                Ok(coin) => {
                    snapshot.insert(to_coin(&symbol).to_string(), coin);
                }
                Err(e) => {
                    tracing::warn!(symbol = %symbol, error = %e, "Skipping symbol for this cycle");
                }
            }
        }

        tracing::debug!(
            requested = coins.len(),
            collected = snapshot.len(),
            "Market snapshot assembled"
        );
        snapshot
    }

    async fn fetch_positions(&self) -> Result<Vec<PositionView>, RetryError<ExchangeError>> {
        self.retry
            .retry(|| async {
                let rows = self.exchange.position_risk(None).await?;
                let mut positions = Vec::new();
                for row in &rows {
                    if let Some(view) = position_from_risk(row)? {
                        positions.push(view);
                    }
                }
                Ok(positions)
            })
            .await
    }

    fn name(&self) -> &str {
        "binance"
    }
}

/// Parse a raw kline; every OHLCV field is required
pub fn parse_kline(raw: &RawKline) -> Result<Kline, ExchangeError> {
    Ok(Kline {
        open_time: raw.open_time,
        open: parse_decimal("open", &raw.open)?,
        high: parse_decimal("high", &raw.high)?,
        low: parse_decimal("low", &raw.low)?,
        close: parse_decimal("close", &raw.close)?,
        volume: parse_decimal("volume", &raw.volume)?,
    })
}

/// EMA20, MACD, RSI7 and RSI14 over short-timeframe closes, trimmed to `n` points
pub fn build_intraday(closes: &[f64], n: usize) -> IntradayView {
    let ema_20 = calculate_ema(closes, 20);
    let macd = calculate_macd(closes).macd;
    let rsi_7 = calculate_rsi(closes, 7);
    let rsi_14 = calculate_rsi(closes, 14);

    IntradayView {
        ema_20: ema_20.last().copied().unwrap_or_default(),
        macd: macd.last().copied().unwrap_or_default(),
        rsi_7: rsi_7.last().copied().unwrap_or_default(),
        series: IntradaySeries {
            prices: last_n(closes, n),
            ema_20: last_n(&ema_20, n),
            macd: last_n(&macd, n),
            rsi_7: last_n(&rsi_7, n),
            rsi_14: last_n(&rsi_14, n),
        },
    }
}

/// Long-timeframe context: scalar averages plus trailing MACD and RSI14 windows
pub fn build_long_term(klines: &[Kline], n: usize) -> LongTermSeries {
    let high: Vec<f64> = klines.iter().map(|k| k.high).collect();
    let low: Vec<f64> = klines.iter().map(|k| k.low).collect();
    let close: Vec<f64> = klines.iter().map(|k| k.close).collect();
    let volume: Vec<f64> = klines.iter().map(|k| k.volume).collect();

    let latest = |series: Vec<f64>| series.last().copied().unwrap_or_default();

    LongTermSeries {
        ema_20: latest(calculate_ema(&close, 20)),
        ema_50: latest(calculate_ema(&close, 50)),
        atr_3: latest(calculate_atr(&high, &low, &close, 3)),
        atr_14: latest(calculate_atr(&high, &low, &close, 14)),
        volume_current: volume.last().copied().unwrap_or_default().round() as i64,
        volume_average: mean(&volume).round() as i64,
        macd: last_n(&calculate_macd(&close).macd, n),
        rsi_14: last_n(&calculate_rsi(&close, 14), n),
    }
}

/// Convert a position-risk row into a bare-coin view; flat rows yield None
///
/// Quantity, entry and mark price are required; the rest fall back to zero.
pub fn position_from_risk(row: &PositionRisk) -> Result<Option<PositionView>, ExchangeError> {
    let quantity = parse_decimal("positionAmt", &row.position_amt)?;
    if quantity == 0.0 {
        return Ok(None);
    }

    let entry_price = parse_decimal("entryPrice", &row.entry_price)?;
    let current_price = parse_decimal("markPrice", &row.mark_price)?;
    let lenient = |field, value: &str| parse_decimal(field, value).unwrap_or(0.0);

    Ok(Some(PositionView {
        symbol: to_coin(&row.symbol).to_string(),
        quantity,
        entry_price,
        current_price,
        liquidation_price: lenient("liquidationPrice", &row.liquidation_price),
        unrealized_pnl: lenient("unRealizedProfit", &row.unrealized_profit),
        leverage: row.leverage.trim().parse().unwrap_or(0),
        notional_usd: (quantity * current_price).abs(),
        ..Default::default()
    }))
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Quote asset every tracked perpetual is settled in
pub const QUOTE_ASSET: &str = "USDT";

/// Map a bare coin ("BTC") to its exchange symbol ("BTCUSDT")
pub fn to_exchange_symbol(coin: &str) -> String {
    format!("{}{}", coin.to_uppercase(), QUOTE_ASSET)
}

/// Map an exchange symbol ("BTCUSDT") back to its bare coin ("BTC")
///
/// Symbols without the quote suffix are returned unchanged.
pub fn to_coin(symbol: &str) -> &str {
    symbol.strip_suffix(QUOTE_ASSET).unwrap_or(symbol)
}

/// OHLCV bar for a fixed interval
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Kline {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Everything handed to the decision-maker for one cycle
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MarketSnapshot {
    pub minutes_elapsed: i64,
    pub coins: BTreeMap<String, CoinSnapshot>,
    pub account: AccountSnapshot,
    pub positions: Vec<PositionView>,
}

/// Market data for a single coin
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CoinSnapshot {
    pub price: f64,
    pub ema_20: f64,
    pub macd: f64,
    pub rsi_7: f64,
    pub oi_funding: OIFunding,
    pub intraday: IntradaySeries,
    pub long_term: LongTermSeries,
}

/// Open interest and funding rate
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct OIFunding {
    pub oi_latest: i64,
    pub oi_avg: i64,
    pub funding_rate: f64,
}

/// Short-timeframe series, oldest first
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct IntradaySeries {
    pub prices: Vec<f64>,
    pub ema_20: Vec<f64>,
    pub macd: Vec<f64>,
    pub rsi_7: Vec<f64>,
    pub rsi_14: Vec<f64>,
}

/// Long-timeframe context
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LongTermSeries {
    pub ema_20: f64,
    pub ema_50: f64,
    pub atr_3: f64,
    pub atr_14: f64,
    pub volume_current: i64,
    pub volume_average: i64,
    pub macd: Vec<f64>,
    pub rsi_14: Vec<f64>,
}

/// Account performance and balances
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct AccountSnapshot {
    pub return_pct: f64,
    pub sharpe_ratio: f64,
    pub cash_available: f64,
    pub account_value: f64,
}

/// Exit strategy attached to an open position
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ExitPlan {
    pub profit_target: f64,
    pub stop_loss: f64,
    pub invalidation_condition: String,
}

/// Open position as reported by the exchange, enriched with local metadata when we have it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PositionView {
    pub symbol: String,
    pub quantity: f64, // Signed: negative is short
    pub entry_price: f64,
    pub current_price: f64,
    pub liquidation_price: f64,
    pub unrealized_pnl: f64,
    pub leverage: u32,
    pub notional_usd: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_plan: Option<ExitPlan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_minutes: Option<i64>,
}

impl PositionView {
    /// True when the exchange reports a position we hold no metadata for
    pub fn is_orphan(&self) -> bool {
        self.exit_plan.is_none()
    }
}

/// Locally-owned record of why and how a position was opened
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeMetadata {
    pub symbol: String,
    pub entry_time: DateTime<Utc>,
    pub profit_target: f64,
    pub stop_loss: f64,
    pub invalidation_condition: String,
    pub confidence: f64,
    pub risk_usd: f64,
    pub justification: String,
}

/// Trading signal kind returned by the decision-maker
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    BuyToEnter,
    SellToEnter,
    Close,
}

impl SignalKind {
    pub fn is_entry(&self) -> bool {
        matches!(self, SignalKind::BuyToEnter | SignalKind::SellToEnter)
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SignalKind::BuyToEnter => "buy_to_enter",
            SignalKind::SellToEnter => "sell_to_enter",
            SignalKind::Close => "close",
        };
        f.write_str(s)
    }
}

/// One action requested by the decision-maker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeSignal {
    pub signal: SignalKind,
    pub coin: String,
    #[serde(default)]
    pub quantity: f64,
    #[serde(default)]
    pub leverage: u32,
    #[serde(default)]
    pub profit_target: f64,
    #[serde(default)]
    pub stop_loss: f64,
    #[serde(default)]
    pub invalidation_condition: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub risk_usd: f64,
    #[serde(default)]
    pub justification: String,
}

impl TradeSignal {
    /// The subset of an entry signal we keep once the order is live
    pub fn to_metadata(&self, entry_time: DateTime<Utc>) -> TradeMetadata {
        TradeMetadata {
            symbol: self.coin.clone(),
            entry_time,
            profit_target: self.profit_target,
            stop_loss: self.stop_loss,
            invalidation_condition: self.invalidation_condition.clone(),
            confidence: self.confidence,
            risk_usd: self.risk_usd,
            justification: self.justification.clone(),
        }
    }
}

/// Decision-maker output for one cycle
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Decision {
    pub portfolio_analysis: String,
    #[serde(rename = "actions")]
    pub signals: Vec<TradeSignal>,
}

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Exchange API error (HTTP {status}) {code}: {msg}")]
    Api { status: u16, code: i64, msg: String },

    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Failed to parse {field} from '{value}'")]
    Parse { field: &'static str, value: String },

    #[error("Symbol {0} not found")]
    SymbolNotFound(String),

    #[error("Failed to encode request: {0}")]
    Encode(String),

    #[error("Client misconfigured: {0}")]
    Config(String),
}

/// Parse a decimal-formatted text field
pub fn parse_decimal(field: &'static str, value: &str) -> Result<f64, ExchangeError> {
    value.trim().parse::<f64>().map_err(|_| ExchangeError::Parse {
        field,
        value: value.to_string(),
    })
}

// ============== Wire Types ==============
// Numeric fields stay as the exchange's decimal text; callers decide how strict to be.

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TickerPrice {
    pub symbol: String,
    pub price: String,
}

/// One kline row: open time, then O/H/L/C/V as decimal text
#[derive(Debug, Clone, PartialEq)]
pub struct RawKline {
    pub open_time: i64,
    pub open: String,
    pub high: String,
    pub low: String,
    pub close: String,
    pub volume: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PremiumIndex {
    pub symbol: String,
    #[serde(default)]
    pub mark_price: String,
    #[serde(default)]
    pub last_funding_rate: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OpenInterest {
    pub symbol: String,
    pub open_interest: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OpenInterestStat {
    pub symbol: String,
    pub sum_open_interest: String,
    #[serde(default)]
    pub sum_open_interest_value: String,
    #[serde(default)]
    pub timestamp: i64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AssetBalance {
    pub asset: String,
    #[serde(default)]
    pub wallet_balance: String,
    pub available_balance: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    pub total_margin_balance: String,
    #[serde(default)]
    pub total_wallet_balance: String,
    #[serde(default)]
    pub total_unrealized_profit: String,
    #[serde(default)]
    pub available_balance: String,
    #[serde(default)]
    pub assets: Vec<AssetBalance>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PositionRisk {
    pub symbol: String,
    pub position_amt: String,
    pub entry_price: String,
    pub mark_price: String,
    #[serde(default, rename = "unRealizedProfit")]
    pub unrealized_profit: String,
    #[serde(default)]
    pub liquidation_price: String,
    #[serde(default)]
    pub leverage: String,
    #[serde(default)]
    pub notional: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    StopMarket,
    TakeProfitMarket,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
            OrderType::StopMarket => "STOP_MARKET",
            OrderType::TakeProfitMarket => "TAKE_PROFIT_MARKET",
        }
    }
}

/// Price a stop/take-profit trigger is evaluated against
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkingType {
    MarkPrice,
    ContractPrice,
}

impl WorkingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkingType::MarkPrice => "MARK_PRICE",
            WorkingType::ContractPrice => "CONTRACT_PRICE",
        }
    }
}

/// A single order submission; quantities and prices are already precision-formatted
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Option<String>,
    pub stop_price: Option<String>,
    pub working_type: Option<WorkingType>,
    pub close_position: bool,
    pub reduce_only: bool,
    pub client_order_id: Option<String>,
}

impl OrderRequest {
    pub fn market(symbol: &str, side: OrderSide, quantity: String) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            quantity: Some(quantity),
            stop_price: None,
            working_type: None,
            close_position: false,
            reduce_only: false,
            client_order_id: None,
        }
    }

    /// Protective order that flattens the whole position when the mark price hits `stop_price`
    pub fn close_position_trigger(
        symbol: &str,
        side: OrderSide,
        order_type: OrderType,
        stop_price: String,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type,
            quantity: None,
            stop_price: Some(stop_price),
            working_type: Some(WorkingType::MarkPrice),
            close_position: true,
            reduce_only: false,
            client_order_id: None,
        }
    }

    pub fn reduce_only(mut self) -> Self {
        self.reduce_only = true;
        self
    }

    pub fn with_client_order_id(mut self, id: String) -> Self {
        self.client_order_id = Some(id);
        self
    }

    /// Exchange parameter names and values, all as text
    pub fn to_params(&self) -> BTreeMap<&'static str, String> {
        let mut params = BTreeMap::new();
        params.insert("symbol", self.symbol.clone());
        params.insert("side", self.side.as_str().to_string());
        params.insert("type", self.order_type.as_str().to_string());

        if let Some(quantity) = &self.quantity {
            params.insert("quantity", quantity.clone());
        }
        if let Some(stop_price) = &self.stop_price {
            params.insert("stopPrice", stop_price.clone());
        }
        if let Some(working_type) = self.working_type {
            params.insert("workingType", working_type.as_str().to_string());
        }
        if self.close_position {
            params.insert("closePosition", "true".to_string());
        }
        if self.reduce_only {
            params.insert("reduceOnly", "true".to_string());
        }
        if let Some(id) = &self.client_order_id {
            params.insert("newClientOrderId", id.clone());
        }

        params
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderAck {
    pub order_id: i64,
    pub symbol: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub client_order_id: String,
}

/// Error body the exchange returns for rejected requests
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ApiErrorBody {
    pub code: i64,
    pub msg: String,
}

/// Per-order outcome inside an accepted batch
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum BatchOrderResult {
    Rejected(ApiErrorBody),
    Accepted(OrderAck),
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "filterType")]
pub enum SymbolFilter {
    #[serde(rename = "PRICE_FILTER", rename_all = "camelCase")]
    PriceFilter { tick_size: String },
    #[serde(rename = "LOT_SIZE", rename_all = "camelCase")]
    LotSize { step_size: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SymbolInfo {
    pub symbol: String,
    #[serde(default)]
    pub filters: Vec<SymbolFilter>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ExchangeInfo {
    pub symbols: Vec<SymbolInfo>,
}

/// Exchange operations the pipeline depends on
///
/// Symbols here always carry the quote suffix.
#[async_trait]
pub trait Exchange: Send + Sync {
    async fn ticker_price(&self, symbol: &str) -> Result<TickerPrice, ExchangeError>;

    async fn klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<RawKline>, ExchangeError>;

    async fn premium_index(&self, symbol: &str) -> Result<PremiumIndex, ExchangeError>;

    async fn open_interest(&self, symbol: &str) -> Result<OpenInterest, ExchangeError>;

    async fn open_interest_hist(
        &self,
        symbol: &str,
        period: &str,
        limit: u32,
    ) -> Result<Vec<OpenInterestStat>, ExchangeError>;

    async fn account(&self) -> Result<AccountInfo, ExchangeError>;

    /// All positions when `symbol` is None
    async fn position_risk(&self, symbol: Option<&str>)
        -> Result<Vec<PositionRisk>, ExchangeError>;

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExchangeError>;

    async fn cancel_all_orders(&self, symbol: &str) -> Result<(), ExchangeError>;

    async fn create_order(&self, order: &OrderRequest) -> Result<OrderAck, ExchangeError>;

    async fn create_batch_orders(
        &self,
        orders: &[OrderRequest],
    ) -> Result<Vec<BatchOrderResult>, ExchangeError>;

    async fn exchange_info(&self) -> Result<ExchangeInfo, ExchangeError>;
}

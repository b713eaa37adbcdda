//! Binance USDT-M futures REST client
//!
//! Public market data is unsigned. Account and order endpoints are signed with
//! HMAC-SHA256 over the url-encoded query and carry the `X-MBX-APIKEY` header.
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use sha2::Sha256;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use super::exchange::*;
use crate::config::AppConfig;

type HmacSha256 = Hmac<Sha256>;

// Type alias for the rate limiter to simplify signatures
type BinanceRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

const REQUEST_TIMEOUT_SECS: u64 = 10;

/// API key pair for signed endpoints
#[derive(Clone)]
pub struct ApiCredentials {
    api_key: String,
    secret_key: SecretString,
}

impl ApiCredentials {
    pub fn new(api_key: String, secret_key: String) -> Self {
        Self {
            api_key,
            secret_key: SecretString::from(secret_key),
        }
    }

    /// Read `BINANCE_API_KEY` / `BINANCE_SECRET_KEY`
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("BINANCE_API_KEY").ok()?;
        let secret_key = std::env::var("BINANCE_SECRET_KEY").ok()?;
        Some(Self::new(api_key, secret_key))
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Hex-encoded HMAC-SHA256 of `message` under the secret key
    pub fn sign(&self, message: &str) -> Result<String, ExchangeError> {
        let mut mac = HmacSha256::new_from_slice(self.secret_key.expose_secret().as_bytes())
            .map_err(|e| ExchangeError::Config(format!("invalid signing key: {}", e)))?;
        mac.update(message.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_key", &self.api_key)
            .field("secret_key", &"[REDACTED]")
            .finish()
    }
}

/// Binance futures client with client-side rate limiting
///
/// Cloneable; all clones share the same rate limiter.
#[derive(Clone)]
pub struct BinanceFuturesClient {
    client: Client,
    base_url: String,
    credentials: Option<ApiCredentials>,
    rate_limiter: Arc<BinanceRateLimiter>,
    recv_window_ms: u64,
}

impl BinanceFuturesClient {
    pub fn new(
        base_url: &str,
        credentials: Option<ApiCredentials>,
        requests_per_minute: u32,
        recv_window_ms: u64,
    ) -> Result<Self, ExchangeError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        let quota =
            Quota::per_minute(NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN));

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
            recv_window_ms,
        })
    }

    pub fn from_config(
        cfg: &AppConfig,
        credentials: Option<ApiCredentials>,
    ) -> Result<Self, ExchangeError> {
        Self::new(
            cfg.exchange_url(),
            credentials,
            cfg.requests_per_minute,
            cfg.recv_window_ms,
        )
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    fn credentials(&self) -> Result<&ApiCredentials, ExchangeError> {
        self.credentials.as_ref().ok_or_else(|| {
            ExchangeError::Config(
                "signed endpoint requires BINANCE_API_KEY and BINANCE_SECRET_KEY".to_string(),
            )
        })
    }

    fn encode(params: &[(&str, String)]) -> Result<String, ExchangeError> {
        serde_urlencoded::to_string(params).map_err(|e| ExchangeError::Encode(e.to_string()))
    }

    /// Append recvWindow and timestamp, then the signature over the encoded query
    fn signed_query(&self, mut params: Vec<(&str, String)>) -> Result<String, ExchangeError> {
        let credentials = self.credentials()?;
        params.push(("recvWindow", self.recv_window_ms.to_string()));
        params.push(("timestamp", chrono::Utc::now().timestamp_millis().to_string()));

        let query = Self::encode(&params)?;
        let signature = credentials.sign(&query)?;
        Ok(format!("{}&signature={}", query, signature))
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: String,
        signed: bool,
    ) -> Result<T, ExchangeError> {
        self.rate_limiter.until_ready().await;

        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };

        let mut request = self.client.request(method.clone(), &url);
        if signed {
            request = request.header("X-MBX-APIKEY", self.credentials()?.api_key());
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let err = api_error(status.as_u16(), &body);
            tracing::debug!(%method, path, error = %err, "Exchange request rejected");
            return Err(err);
        }

        Ok(serde_json::from_str(&body)?)
    }

    async fn public<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        let query = Self::encode(params)?;
        self.send(Method::GET, path, query, false).await
    }

    async fn signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: Vec<(&str, String)>,
    ) -> Result<T, ExchangeError> {
        let query = self.signed_query(params)?;
        self.send(method, path, query, true).await
    }
}

/// Map a non-2xx body to an API error, keeping the raw text when it is not `{code,msg}`
fn api_error(status: u16, body: &str) -> ExchangeError {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(parsed) => ExchangeError::Api {
            status,
            code: parsed.code,
            msg: parsed.msg,
        },
        Err(_) => ExchangeError::Api {
            status,
            code: 0,
            msg: body.chars().take(200).collect(),
        },
    }
}

fn kline_from_row(row: &[serde_json::Value]) -> Result<RawKline, ExchangeError> {
    let field = |idx: usize, name: &'static str| -> Result<String, ExchangeError> {
        match row.get(idx) {
            Some(serde_json::Value::String(s)) => Ok(s.clone()),
            Some(serde_json::Value::Number(n)) => Ok(n.to_string()),
            other => Err(ExchangeError::Parse {
                field: name,
                value: format!("{:?}", other),
            }),
        }
    };

    let open_time = row
        .first()
        .and_then(|v| v.as_i64())
        .ok_or_else(|| ExchangeError::Parse {
            field: "openTime",
            value: format!("{:?}", row.first()),
        })?;

    Ok(RawKline {
        open_time,
        open: field(1, "open")?,
        high: field(2, "high")?,
        low: field(3, "low")?,
        close: field(4, "close")?,
        volume: field(5, "volume")?,
    })
}

#[async_trait]
impl Exchange for BinanceFuturesClient {
    /// Endpoint: GET /fapi/v1/ticker/price
    async fn ticker_price(&self, symbol: &str) -> Result<TickerPrice, ExchangeError> {
        self.public("/fapi/v1/ticker/price", &[("symbol", symbol.to_string())])
            .await
    }

    /// Endpoint: GET /fapi/v1/klines
    async fn klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<RawKline>, ExchangeError> {
        let rows: Vec<Vec<serde_json::Value>> = self
            .public(
                "/fapi/v1/klines",
                &[
                    ("symbol", symbol.to_string()),
                    ("interval", interval.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        rows.iter().map(|row| kline_from_row(row)).collect()
    }

    /// Endpoint: GET /fapi/v1/premiumIndex
    async fn premium_index(&self, symbol: &str) -> Result<PremiumIndex, ExchangeError> {
        self.public("/fapi/v1/premiumIndex", &[("symbol", symbol.to_string())])
            .await
    }

    /// Endpoint: GET /fapi/v1/openInterest
    async fn open_interest(&self, symbol: &str) -> Result<OpenInterest, ExchangeError> {
        self.public("/fapi/v1/openInterest", &[("symbol", symbol.to_string())])
            .await
    }

    /// Endpoint: GET /futures/data/openInterestHist
    async fn open_interest_hist(
        &self,
        symbol: &str,
        period: &str,
        limit: u32,
    ) -> Result<Vec<OpenInterestStat>, ExchangeError> {
        self.public(
            "/futures/data/openInterestHist",
            &[
                ("symbol", symbol.to_string()),
                ("period", period.to_string()),
                ("limit", limit.to_string()),
            ],
        )
        .await
    }

    /// Endpoint: GET /fapi/v2/account
    async fn account(&self) -> Result<AccountInfo, ExchangeError> {
        self.signed(Method::GET, "/fapi/v2/account", Vec::new()).await
    }

    /// Endpoint: GET /fapi/v2/positionRisk
    async fn position_risk(
        &self,
        symbol: Option<&str>,
    ) -> Result<Vec<PositionRisk>, ExchangeError> {
        let params = symbol
            .map(|s| vec![("symbol", s.to_string())])
            .unwrap_or_default();
        self.signed(Method::GET, "/fapi/v2/positionRisk", params).await
    }

    /// Endpoint: POST /fapi/v1/leverage
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExchangeError> {
        let _: serde_json::Value = self
            .signed(
                Method::POST,
                "/fapi/v1/leverage",
                vec![
                    ("symbol", symbol.to_string()),
                    ("leverage", leverage.to_string()),
                ],
            )
            .await?;
        Ok(())
    }

    /// Endpoint: DELETE /fapi/v1/allOpenOrders
    async fn cancel_all_orders(&self, symbol: &str) -> Result<(), ExchangeError> {
        let _: serde_json::Value = self
            .signed(
                Method::DELETE,
                "/fapi/v1/allOpenOrders",
                vec![("symbol", symbol.to_string())],
            )
            .await?;
        Ok(())
    }

    /// Endpoint: POST /fapi/v1/order
    async fn create_order(&self, order: &OrderRequest) -> Result<OrderAck, ExchangeError> {
        let params = order.to_params().into_iter().collect();
        self.signed(Method::POST, "/fapi/v1/order", params).await
    }

    /// Endpoint: POST /fapi/v1/batchOrders
    async fn create_batch_orders(
        &self,
        orders: &[OrderRequest],
    ) -> Result<Vec<BatchOrderResult>, ExchangeError> {
        let batch: Vec<_> = orders.iter().map(|o| o.to_params()).collect();
        let encoded = serde_json::to_string(&batch)?;
        self.signed(
            Method::POST,
            "/fapi/v1/batchOrders",
            vec![("batchOrders", encoded)],
        )
        .await
    }

    /// Endpoint: GET /fapi/v1/exchangeInfo
    async fn exchange_info(&self) -> Result<ExchangeInfo, ExchangeError> {
        self.public("/fapi/v1/exchangeInfo", &[]).await
    }
}

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix for environment overrides, e.g. `PERPTRADER__DECISION_INTERVAL_MINUTES=5`
pub const ENV_PREFIX: &str = "PERPTRADER";

/// Runtime configuration
///
/// Built once at startup and passed by reference into every component.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Coins to trade, without the quote suffix
    pub asset_universe: Vec<String>,

    // Market data
    pub short_interval: String,
    pub long_interval: String,
    pub kline_limit: u32,
    pub series_length: usize,
    pub oi_period: String,
    pub oi_limit: u32,

    // Account
    pub max_equity_history: usize,
    pub starting_capital: f64,

    // Cadence
    pub decision_interval_minutes: u64,

    // Retry; negative means a single attempt
    pub max_retries: i64,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,

    // Exchange
    pub exchange_base_url: String,
    pub testnet: bool,
    pub recv_window_ms: u64,
    pub requests_per_minute: u32,

    // Decision-maker
    pub model: String,
    pub llm_temperature: f32,
    pub min_leverage: u32,
    pub max_leverage: u32,

    // Persistence
    pub persistence_path: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            asset_universe: ["BTC", "ETH", "AERO", "BNB", "SOL"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            short_interval: "3m".to_string(),
            long_interval: "4h".to_string(),
            kline_limit: 100,
            series_length: 10,
            oi_period: "5m".to_string(),
            oi_limit: 288, // 24h of 5m buckets
            max_equity_history: 1024,
            starting_capital: 10000.0,
            decision_interval_minutes: 3,
            max_retries: 3,
            retry_base_delay_ms: 100,
            retry_max_delay_ms: 5000,
            exchange_base_url: "https://fapi.binance.com".to_string(),
            testnet: false,
            recv_window_ms: 5000,
            requests_per_minute: 1200,
            model: "gpt-4o-mini".to_string(),
            llm_temperature: 0.7,
            min_leverage: 1,
            max_leverage: 20,
            persistence_path: PathBuf::from("state.json"),
        }
    }
}

impl AppConfig {
    /// Load configuration: defaults, then optional file, then `PERPTRADER__*` env vars
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("asset_universe")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let cfg: AppConfig = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.asset_universe.is_empty() {
            anyhow::bail!("asset_universe must not be empty");
        }
        if self.series_length == 0 || self.kline_limit == 0 {
            anyhow::bail!("series_length and kline_limit must be positive");
        }
        if self.max_equity_history == 0 {
            anyhow::bail!("max_equity_history must be positive");
        }
        if self.decision_interval_minutes == 0 {
            anyhow::bail!("decision_interval_minutes must be positive");
        }
        if self.min_leverage == 0 || self.min_leverage > self.max_leverage {
            anyhow::bail!(
                "invalid leverage bounds [{}, {}]",
                self.min_leverage,
                self.max_leverage
            );
        }
        Ok(())
    }

    pub fn decision_interval(&self) -> Duration {
        Duration::from_secs(self.decision_interval_minutes * 60)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    /// Exchange REST root, switching to testnet when requested
    pub fn exchange_url(&self) -> &str {
        if self.testnet {
            "https://testnet.binancefuture.com"
        } else {
            &self.exchange_base_url
        }
    }
}

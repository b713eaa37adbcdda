// Account tracking: equity history, return and Sharpe ratio
pub mod equity;

pub use equity::{period_returns, sharpe_ratio, EquityHistory};

use std::sync::Arc;
use tokio::sync::RwLock;

use crate::api::{parse_decimal, AccountInfo, Exchange, ExchangeError};
use crate::config::AppConfig;
use crate::models::{AccountSnapshot, QUOTE_ASSET};
use crate::retry::{RetryError, RetryPolicy};

/// Raw balances read from the exchange
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Balances {
    pub account_value: f64,
    pub cash_available: f64,
}

impl Balances {
    /// Total margin balance plus the quote asset's available balance
    ///
    /// Falls back to the account-level available balance when the quote asset row is missing.
    pub fn from_account(info: &AccountInfo) -> Result<Self, ExchangeError> {
        let account_value = parse_decimal("totalMarginBalance", &info.total_margin_balance)?;
        let cash = info
            .assets
            .iter()
            .find(|a| a.asset == QUOTE_ASSET)
            .map(|a| a.available_balance.as_str())
            .unwrap_or(info.available_balance.as_str());
        let cash_available = parse_decimal("availableBalance", cash)?;

        Ok(Self {
            account_value,
            cash_available,
        })
    }
}

/// Tracks account equity across cycles
///
/// `initial_value` is fixed at construction; the history only grows on successful reads.
pub struct AccountTracker {
    exchange: Arc<dyn Exchange>,
    retry: RetryPolicy,
    initial_value: f64,
    history: RwLock<EquityHistory>,
}

impl AccountTracker {
    pub fn new(
        exchange: Arc<dyn Exchange>,
        retry: RetryPolicy,
        capacity: usize,
        initial_value: f64,
    ) -> Self {
        Self {
            exchange,
            retry,
            initial_value,
            history: RwLock::new(EquityHistory::new(capacity)),
        }
    }

    /// Capture the initial value from the live account at startup
    ///
    /// Uses the configured starting capital when the account cannot be read.
    pub async fn bootstrap(exchange: Arc<dyn Exchange>, cfg: &AppConfig) -> Self {
        let retry = RetryPolicy::from_config(cfg);
        let initial_value = match Self::read_balances(exchange.as_ref(), &retry).await {
            Ok(balances) => balances.account_value,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    starting_capital = cfg.starting_capital,
                    "Could not read initial account value, using starting capital"
                );
                cfg.starting_capital
            }
        };

        tracing::info!(initial_value, "Account tracker initialized");
        Self::new(exchange, retry, cfg.max_equity_history, initial_value)
    }

    pub fn initial_value(&self) -> f64 {
        self.initial_value
    }

    async fn read_balances(
        exchange: &dyn Exchange,
        retry: &RetryPolicy,
    ) -> Result<Balances, RetryError<ExchangeError>> {
        retry
            .retry(|| async {
                let info = exchange.account().await?;
                Balances::from_account(&info)
            })
            .await
    }

    /// Read balances, record the sample and derive return and Sharpe ratio
    pub async fn fetch_account(&self) -> Result<AccountSnapshot, RetryError<ExchangeError>> {
        let balances = Self::read_balances(self.exchange.as_ref(), &self.retry).await?;

        let sharpe = {
            let mut history = self.history.write().await;
            history.push(balances.account_value);
            sharpe_ratio(&history.values())
        };

        let snapshot = AccountSnapshot {
            return_pct: return_pct(self.initial_value, balances.account_value),
            sharpe_ratio: sharpe,
            cash_available: balances.cash_available,
            account_value: balances.account_value,
        };

        tracing::debug!(
            account_value = snapshot.account_value,
            return_pct = snapshot.return_pct,
            sharpe = snapshot.sharpe_ratio,
            "Account snapshot"
        );
        Ok(snapshot)
    }

    /// Copy of the retained equity samples, oldest first
    pub async fn history(&self) -> Vec<f64> {
        self.history.read().await.values()
    }
}

/// Fractional return since `initial`; zero when there is no baseline
pub fn return_pct(initial: f64, current: f64) -> f64 {
    if initial == 0.0 {
        return 0.0;
    }
    (current - initial) / initial
}

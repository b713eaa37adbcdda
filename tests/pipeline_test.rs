use async_trait::async_trait;
use perptrader::account::AccountTracker;
use perptrader::api::{
    AccountInfo, ApiErrorBody, AssetBalance, BatchOrderResult, Exchange, ExchangeError,
    ExchangeInfo, OpenInterest, OpenInterestStat, OrderAck, OrderRequest, OrderSide, OrderType,
    PositionRisk, PremiumIndex, RawKline, SymbolFilter, SymbolInfo, TickerPrice,
};
use perptrader::collector::{MarketCollector, MarketDataCollector};
use perptrader::engine::{CycleOutcome, Engine};
use perptrader::execution::{
    ExecutionError, OrderExecutor, PositionReconciler, PrecisionTable, SymbolPrecision,
};
use perptrader::llm::{DecisionError, DecisionMaker};
use perptrader::persistence::{MemoryStore, PersistedState, StateStore};
use perptrader::retry::RetryPolicy;
use perptrader::{AppConfig, Decision, MarketSnapshot, SignalKind, TradeMetadata, TradeSignal};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Scripted exchange
// ============================================================================

/// In-memory exchange: fixed prices, scripted account values and a live position book
#[derive(Default)]
struct FakeExchange {
    prices: HashMap<String, f64>,
    failing_klines: HashSet<String>,
    flaky_klines: Mutex<HashMap<String, u32>>,
    reject_protective: bool,
    margin_balances: Mutex<VecDeque<f64>>,
    positions: Mutex<HashMap<String, f64>>,
    calls: Mutex<Vec<String>>,
    orders: Mutex<Vec<OrderRequest>>,
}

impl FakeExchange {
    fn new() -> Self {
        let prices = [("BTCUSDT", 65500.0), ("ETHUSDT", 3520.0), ("AEROUSDT", 1.25)]
            .into_iter()
            .map(|(s, p)| (s.to_string(), p))
            .collect();

        Self {
            prices,
            margin_balances: Mutex::new(VecDeque::from([10000.0])),
            ..Default::default()
        }
    }

    fn with_failing_klines(mut self, symbol: &str) -> Self {
        self.failing_klines.insert(symbol.to_string());
        self
    }

    /// Long-interval klines for `symbol` fail `failures` times, then recover
    fn with_flaky_klines(self, symbol: &str, failures: u32) -> Self {
        self.flaky_klines
            .lock()
            .unwrap()
            .insert(symbol.to_string(), failures);
        self
    }

    fn flaky_failures_left(&self, symbol: &str) -> u32 {
        self.flaky_klines
            .lock()
            .unwrap()
            .get(symbol)
            .copied()
            .unwrap_or(0)
    }

    fn rejecting_protective_orders(mut self) -> Self {
        self.reject_protective = true;
        self
    }

    fn with_balances(self, values: &[f64]) -> Self {
        *self.margin_balances.lock().unwrap() = values.iter().copied().collect();
        self
    }

    fn with_position(self, symbol: &str, amount: f64) -> Self {
        self.positions
            .lock()
            .unwrap()
            .insert(symbol.to_string(), amount);
        self
    }

    fn position(&self, symbol: &str) -> f64 {
        self.positions
            .lock()
            .unwrap()
            .get(symbol)
            .copied()
            .unwrap_or(0.0)
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn orders(&self) -> Vec<OrderRequest> {
        self.orders.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn price(&self, symbol: &str) -> Result<f64, ExchangeError> {
        self.prices
            .get(symbol)
            .copied()
            .ok_or_else(|| ExchangeError::SymbolNotFound(symbol.to_string()))
    }

    fn risk_row(&self, symbol: &str, amount: f64) -> PositionRisk {
        let mark = self.prices.get(symbol).copied().unwrap_or(100.0);
        PositionRisk {
            symbol: symbol.to_string(),
            position_amt: amount.to_string(),
            entry_price: (mark * 0.99).to_string(),
            mark_price: mark.to_string(),
            unrealized_profit: (amount * mark * 0.01).to_string(),
            liquidation_price: "0".to_string(),
            leverage: "10".to_string(),
            notional: (amount * mark).to_string(),
        }
    }

    fn fill(&self, order: &OrderRequest) {
        let qty: f64 = order
            .quantity
            .as_deref()
            .and_then(|q| q.parse().ok())
            .unwrap_or(0.0);
        let signed = match order.side {
            OrderSide::Buy => qty,
            OrderSide::Sell => -qty,
        };
        *self
            .positions
            .lock()
            .unwrap()
            .entry(order.symbol.clone())
            .or_default() += signed;
    }
}

#[async_trait]
impl Exchange for FakeExchange {
    async fn ticker_price(&self, symbol: &str) -> Result<TickerPrice, ExchangeError> {
        let price = self.price(symbol)?;
        Ok(TickerPrice {
            symbol: symbol.to_string(),
            price: price.to_string(),
        })
    }

    async fn klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<RawKline>, ExchangeError> {
        if self.failing_klines.contains(symbol) {
            return Err(ExchangeError::Api {
                status: 400,
                code: -1121,
                msg: "Invalid symbol.".to_string(),
            });
        }

        // One long-interval read per attempt, so each attempt consumes one failure
        if interval == "4h" {
            let mut flaky = self.flaky_klines.lock().unwrap();
            if let Some(left) = flaky.get_mut(symbol).filter(|left| **left > 0) {
                *left -= 1;
                return Err(ExchangeError::Api {
                    status: 503,
                    code: -1001,
                    msg: "Internal error; unable to process your request.".to_string(),
                });
            }
        }

        let base = self.price(symbol)?;
        Ok((0..limit as i64)
            .map(|i| {
                let close = base * (1.0 + 0.001 * ((i % 7) as f64 - 3.0));
                RawKline {
                    open_time: 1_700_000_000_000 + i * 180_000,
                    open: base.to_string(),
                    high: (close * 1.002).to_string(),
                    low: (close * 0.998).to_string(),
                    close: close.to_string(),
                    volume: (1000 + i).to_string(),
                }
            })
            .collect())
    }

    async fn premium_index(&self, symbol: &str) -> Result<PremiumIndex, ExchangeError> {
        Ok(PremiumIndex {
            symbol: symbol.to_string(),
            mark_price: self.price(symbol)?.to_string(),
            last_funding_rate: "0.0001".to_string(),
        })
    }

    async fn open_interest(&self, symbol: &str) -> Result<OpenInterest, ExchangeError> {
        Ok(OpenInterest {
            symbol: symbol.to_string(),
            open_interest: "1500.4".to_string(),
        })
    }

    async fn open_interest_hist(
        &self,
        symbol: &str,
        _period: &str,
        _limit: u32,
    ) -> Result<Vec<OpenInterestStat>, ExchangeError> {
        // OI history is optional; its failure must not drop the coin
        Err(ExchangeError::SymbolNotFound(symbol.to_string()))
    }

    async fn account(&self) -> Result<AccountInfo, ExchangeError> {
        let value = {
            let mut balances = self.margin_balances.lock().unwrap();
            if balances.len() > 1 {
                balances.pop_front().unwrap_or_default()
            } else {
                balances.front().copied().unwrap_or_default()
            }
        };

        Ok(AccountInfo {
            total_margin_balance: value.to_string(),
            total_wallet_balance: value.to_string(),
            total_unrealized_profit: "0".to_string(),
            available_balance: value.to_string(),
            assets: vec![AssetBalance {
                asset: "USDT".to_string(),
                wallet_balance: value.to_string(),
                available_balance: (value / 2.0).to_string(),
            }],
        })
    }

    async fn position_risk(
        &self,
        symbol: Option<&str>,
    ) -> Result<Vec<PositionRisk>, ExchangeError> {
        let positions = self.positions.lock().unwrap().clone();
        let mut rows: Vec<PositionRisk> = positions
            .iter()
            .filter(|(s, _)| symbol.map_or(true, |wanted| wanted == s.as_str()))
            .map(|(s, amount)| self.risk_row(s, *amount))
            .collect();
        rows.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(rows)
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExchangeError> {
        self.record(format!("leverage {} {}", symbol, leverage));
        Ok(())
    }

    async fn cancel_all_orders(&self, symbol: &str) -> Result<(), ExchangeError> {
        self.record(format!("cancel {}", symbol));
        // Nothing open: the real exchange answers with an error here
        Err(ExchangeError::Api {
            status: 400,
            code: -2011,
            msg: "Unknown order sent.".to_string(),
        })
    }

    async fn create_order(&self, order: &OrderRequest) -> Result<OrderAck, ExchangeError> {
        self.record(format!("order {} {}", order.symbol, order.side.as_str()));
        self.orders.lock().unwrap().push(order.clone());
        self.fill(order);

        Ok(OrderAck {
            order_id: 42,
            symbol: order.symbol.clone(),
            status: "FILLED".to_string(),
            client_order_id: order.client_order_id.clone().unwrap_or_default(),
        })
    }

    async fn create_batch_orders(
        &self,
        orders: &[OrderRequest],
    ) -> Result<Vec<BatchOrderResult>, ExchangeError> {
        self.record(format!("batch {}", orders.len()));
        self.orders.lock().unwrap().extend(orders.iter().cloned());

        Ok(orders
            .iter()
            .enumerate()
            .map(|(i, order)| {
                if order.order_type == OrderType::Market {
                    self.fill(order);
                } else if self.reject_protective {
                    return BatchOrderResult::Rejected(ApiErrorBody {
                        code: -2021,
                        msg: "Order would immediately trigger.".to_string(),
                    });
                }
                BatchOrderResult::Accepted(OrderAck {
                    order_id: 100 + i as i64,
                    symbol: order.symbol.clone(),
                    status: "NEW".to_string(),
                    client_order_id: order.client_order_id.clone().unwrap_or_default(),
                })
            })
            .collect())
    }

    async fn exchange_info(&self) -> Result<ExchangeInfo, ExchangeError> {
        let symbol = |name: &str, tick: &str, step: &str| SymbolInfo {
            symbol: name.to_string(),
            filters: vec![
                SymbolFilter::PriceFilter {
                    tick_size: tick.to_string(),
                },
                SymbolFilter::LotSize {
                    step_size: step.to_string(),
                },
                SymbolFilter::Other,
            ],
        };

        Ok(ExchangeInfo {
            symbols: vec![
                symbol("BTCUSDT", "0.10", "0.001"),
                symbol("ETHUSDT", "0.01", "0.001"),
                symbol("SOLUSDT", "0.0100", "1"),
            ],
        })
    }
}

// ============================================================================
// Scripted decision-maker and shared store
// ============================================================================

/// Returns a fixed decision, or an empty-response error when none is set
struct ScriptedDecision {
    decision: Option<Decision>,
    seen: Arc<Mutex<Vec<MarketSnapshot>>>,
}

#[async_trait]
impl DecisionMaker for ScriptedDecision {
    async fn decide(
        &self,
        snapshot: &MarketSnapshot,
        _commentary: &str,
    ) -> Result<Decision, DecisionError> {
        self.seen.lock().unwrap().push(snapshot.clone());
        self.decision.clone().ok_or(DecisionError::EmptyResponse)
    }
}

/// Lets the test inspect the store after handing it to the engine
struct SharedStore(Arc<MemoryStore>);

#[async_trait]
impl StateStore for SharedStore {
    async fn load(&self) -> PersistedState {
        self.0.load().await
    }

    async fn save(&self, state: &PersistedState) -> perptrader::Result<()> {
        self.0.save(state).await
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn test_config(universe: &[&str]) -> AppConfig {
    AppConfig {
        asset_universe: universe.iter().map(|s| s.to_string()).collect(),
        kline_limit: 60,
        max_retries: 0,
        retry_base_delay_ms: 1,
        retry_max_delay_ms: 2,
        ..Default::default()
    }
}

fn entry(kind: SignalKind, coin: &str, quantity: f64) -> TradeSignal {
    TradeSignal {
        signal: kind,
        coin: coin.to_string(),
        quantity,
        leverage: 5,
        profit_target: 70000.04,
        stop_loss: 60000.06,
        invalidation_condition: "4h close below 60k".to_string(),
        confidence: 0.7,
        risk_usd: 50.0,
        justification: "trend continuation".to_string(),
    }
}

fn close(coin: &str) -> TradeSignal {
    TradeSignal {
        signal: SignalKind::Close,
        coin: coin.to_string(),
        quantity: 0.0,
        leverage: 0,
        profit_target: 0.0,
        stop_loss: 0.0,
        invalidation_condition: String::new(),
        confidence: 0.5,
        risk_usd: 0.0,
        justification: "target hit".to_string(),
    }
}

fn eth_metadata() -> TradeMetadata {
    entry(SignalKind::SellToEnter, "ETH", 2.0).to_metadata(chrono::Utc::now())
}

async fn build_engine(
    fake: Arc<FakeExchange>,
    cfg: &AppConfig,
    decision: Option<Decision>,
    store: Arc<MemoryStore>,
) -> (Engine, Arc<Mutex<Vec<MarketSnapshot>>>) {
    let exchange: Arc<dyn Exchange> = fake;
    let retry = RetryPolicy::from_config(cfg);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let collector = MarketDataCollector::new(exchange.clone(), cfg).with_retry(retry);
    let account = AccountTracker::new(exchange.clone(), retry, cfg.max_equity_history, 10000.0);
    let executor = tokio_test::assert_ok!(OrderExecutor::new(exchange, retry).await);

    let engine = Engine::new(
        cfg,
        Box::new(collector),
        account,
        executor,
        Box::new(ScriptedDecision {
            decision,
            seen: seen.clone(),
        }),
        Box::new(SharedStore(store)),
    )
    .await;

    (engine, seen)
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_snapshot_skips_coin_with_failing_klines() {
    let cfg = test_config(&["BTC", "ETH", "AERO"]);
    let fake = Arc::new(FakeExchange::new().with_failing_klines("AEROUSDT"));
    let collector = MarketDataCollector::new(fake.clone(), &cfg);

    let coins = collector.fetch_snapshot(&cfg.asset_universe).await;

    assert_eq!(coins.keys().cloned().collect::<Vec<_>>(), vec!["BTC", "ETH"]);
    let btc = &coins["BTC"];
    assert_eq!(btc.price, 65500.0);
    assert_eq!(btc.intraday.prices.len(), cfg.series_length);
    assert_eq!(btc.long_term.macd.len(), cfg.series_length);
    // History failed, the other two OI reads still land
    assert_eq!(btc.oi_funding.oi_latest, 1500);
    assert_eq!(btc.oi_funding.oi_avg, 0);
    assert_eq!(btc.oi_funding.funding_rate, 0.0001);
}

#[tokio::test]
async fn test_snapshot_retries_transient_kline_failures() {
    let cfg = AppConfig {
        max_retries: 2,
        ..test_config(&["BTC", "ETH", "AERO"])
    };
    let fake = Arc::new(FakeExchange::new().with_flaky_klines("AEROUSDT", 2));
    let collector = MarketDataCollector::new(fake.clone(), &cfg);

    let coins = collector.fetch_snapshot(&cfg.asset_universe).await;

    assert_eq!(
        coins.keys().cloned().collect::<Vec<_>>(),
        vec!["AERO", "BTC", "ETH"]
    );
    assert_eq!(coins["AERO"].price, 1.25);
    assert_eq!(fake.flaky_failures_left("AEROUSDT"), 0);
}

#[tokio::test]
async fn test_snapshot_drops_coin_when_retries_run_out() {
    let cfg = AppConfig {
        max_retries: 1,
        ..test_config(&["BTC", "ETH", "AERO"])
    };
    let fake = Arc::new(FakeExchange::new().with_flaky_klines("AEROUSDT", 3));
    let collector = MarketDataCollector::new(fake.clone(), &cfg);

    let coins = collector.fetch_snapshot(&cfg.asset_universe).await;

    assert_eq!(coins.keys().cloned().collect::<Vec<_>>(), vec!["BTC", "ETH"]);
    // First attempt plus one retry
    assert_eq!(fake.flaky_failures_left("AEROUSDT"), 1);
}

#[tokio::test]
async fn test_account_return_and_sharpe_over_cycles() {
    let cfg = test_config(&["BTC"]);
    let fake = Arc::new(FakeExchange::new().with_balances(&[10000.0, 10500.0, 10200.0]));
    let tracker = AccountTracker::new(fake, RetryPolicy::no_retry(), 1024, 10000.0);

    let first = tokio_test::assert_ok!(tracker.fetch_account().await);
    assert_eq!(first.sharpe_ratio, 0.0);
    assert_eq!(first.return_pct, 0.0);

    tracker.fetch_account().await.unwrap();
    let third = tracker.fetch_account().await.unwrap();

    assert!((third.return_pct - 0.02).abs() < 1e-12);
    assert_eq!(third.account_value, 10200.0);
    assert_eq!(third.cash_available, 5100.0);
    assert!(third.sharpe_ratio > 0.0);
    assert_eq!(tracker.history().await, vec![10000.0, 10500.0, 10200.0]);
    assert_eq!(cfg.max_equity_history, 1024);
}

#[tokio::test]
async fn test_orphan_position_stays_unenriched() {
    let cfg = test_config(&["BTC"]);
    let fake = Arc::new(
        FakeExchange::new()
            .with_position("ETHUSDT", -2.0)
            .with_position("SOLUSDT", 3.0),
    );
    let collector = MarketDataCollector::new(fake, &cfg);
    let reconciler = PositionReconciler::from_state(HashMap::from([(
        "ETH".to_string(),
        eth_metadata(),
    )]));

    let positions = tokio_test::assert_ok!(collector.fetch_positions().await);
    let merged = reconciler.merge(positions).await;

    let eth = merged.iter().find(|p| p.symbol == "ETH").unwrap();
    let sol = merged.iter().find(|p| p.symbol == "SOL").unwrap();
    assert!(!eth.is_orphan());
    assert_eq!(eth.quantity, -2.0);
    assert_eq!(eth.confidence, Some(0.7));
    assert!(sol.is_orphan());
    assert_eq!(sol.quantity, 3.0);
    assert!(sol.age_minutes.is_none());
}

#[tokio::test]
async fn test_enter_then_close_round_trip() {
    let fake = Arc::new(FakeExchange::new());
    let executor = OrderExecutor::new(fake.clone(), RetryPolicy::no_retry())
        .await
        .unwrap();
    let reconciler = PositionReconciler::new();

    let signal = entry(SignalKind::BuyToEnter, "BTC", 0.0123);
    tokio_test::assert_ok!(executor.enter(&signal).await);
    assert!(reconciler.add(&signal).await);

    let orders = fake.orders();
    assert_eq!(orders.len(), 3);
    assert_eq!(orders[0].order_type, OrderType::Market);
    assert_eq!(orders[0].side, OrderSide::Buy);
    assert_eq!(orders[0].quantity.as_deref(), Some("0.012"));
    assert!(orders[0].client_order_id.is_some());
    assert_eq!(orders[1].order_type, OrderType::StopMarket);
    assert_eq!(orders[1].side, OrderSide::Sell);
    assert_eq!(orders[1].stop_price.as_deref(), Some("60000.1"));
    assert!(orders[1].close_position);
    assert_eq!(orders[2].order_type, OrderType::TakeProfitMarket);
    assert_eq!(orders[2].stop_price.as_deref(), Some("70000.0"));
    assert_eq!(fake.position("BTCUSDT"), 0.012);

    tokio_test::assert_ok!(executor.close("BTC").await);
    assert!(reconciler.remove("BTC").await.is_some());

    let close_order = fake.orders().pop().unwrap();
    assert_eq!(close_order.side, OrderSide::Sell);
    assert!(close_order.reduce_only);
    assert_eq!(close_order.quantity.as_deref(), Some("0.012"));
    assert_eq!(fake.position("BTCUSDT"), 0.0);
    assert!(reconciler.snapshot().await.is_empty());

    // Cancel-all precedes leverage on entry and the reduce-only order on close
    assert_eq!(
        fake.calls(),
        vec![
            "cancel BTCUSDT",
            "leverage BTCUSDT 5",
            "batch 3",
            "cancel BTCUSDT",
            "order BTCUSDT SELL",
        ]
    );
}

#[tokio::test]
async fn test_close_flat_position_only_cancels() {
    let fake = Arc::new(FakeExchange::new().with_position("ETHUSDT", 0.0));
    let executor = OrderExecutor::new(fake.clone(), RetryPolicy::no_retry())
        .await
        .unwrap();

    tokio_test::assert_ok!(executor.close("ETH").await);
    assert_eq!(fake.calls(), vec!["cancel ETHUSDT"]);
}

#[tokio::test]
async fn test_close_missing_position_fails() {
    let fake = Arc::new(FakeExchange::new());
    let executor = OrderExecutor::new(fake.clone(), RetryPolicy::no_retry())
        .await
        .unwrap();

    let err = tokio_test::assert_err!(executor.close("ETH").await);
    assert!(matches!(err, ExecutionError::PositionNotFound(ref s) if s == "ETHUSDT"));
    assert!(fake.orders().is_empty());
}

#[tokio::test]
async fn test_close_without_precision_keeps_protective_orders() {
    let fake = Arc::new(FakeExchange::new().with_position("ETHUSDT", -2.0));
    let mut precisions = PrecisionTable::default();
    precisions.insert(
        "BTCUSDT",
        SymbolPrecision {
            price: 1,
            quantity: 3,
        },
    );
    let executor =
        OrderExecutor::with_precisions(fake.clone(), RetryPolicy::no_retry(), precisions);

    let err = tokio_test::assert_err!(executor.close("ETH").await);

    assert!(matches!(err, ExecutionError::UnknownSymbol(ref s) if s == "ETHUSDT"));
    assert!(fake.calls().is_empty());
    assert_eq!(fake.position("ETHUSDT"), -2.0);
}

#[tokio::test]
async fn test_rejected_protective_order_fails_entry() {
    let fake = Arc::new(FakeExchange::new().rejecting_protective_orders());
    let executor = OrderExecutor::new(fake.clone(), RetryPolicy::no_retry())
        .await
        .unwrap();

    let err = executor
        .enter(&entry(SignalKind::SellToEnter, "ETH", 1.5))
        .await
        .unwrap_err();

    match err {
        ExecutionError::BatchRejected { symbol, index, code, .. } => {
            assert_eq!(symbol, "ETHUSDT");
            assert_eq!(index, 1);
            assert_eq!(code, -2021);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_entry_rejected_before_side_effects() {
    let fake = Arc::new(FakeExchange::new());
    let executor = OrderExecutor::new(fake.clone(), RetryPolicy::no_retry())
        .await
        .unwrap();

    // Rounds to zero at 3 dp
    let tiny = executor
        .enter(&entry(SignalKind::BuyToEnter, "BTC", 0.0004))
        .await;
    assert!(matches!(tiny, Err(ExecutionError::InvalidSignal { .. })));

    let unknown = executor
        .enter(&entry(SignalKind::BuyToEnter, "DOGE", 100.0))
        .await;
    assert!(matches!(unknown, Err(ExecutionError::UnknownSymbol(_))));

    assert!(fake.calls().is_empty());
}

#[tokio::test]
async fn test_full_cycle_enters_closes_and_persists() {
    let cfg = test_config(&["BTC", "ETH"]);
    let fake = Arc::new(
        FakeExchange::new()
            .with_position("ETHUSDT", -2.0)
            .with_position("SOLUSDT", 3.0),
    );
    let mut prior = PersistedState::default();
    prior.open_positions.insert("ETH".to_string(), eth_metadata());
    let store = Arc::new(MemoryStore::with_state(prior));

    let decision = Decision {
        portfolio_analysis: "Rotate from ETH short into BTC long".to_string(),
        signals: vec![entry(SignalKind::BuyToEnter, "BTC", 0.0123), close("ETH")],
    };
    let (mut engine, seen) = build_engine(fake.clone(), &cfg, Some(decision), store.clone()).await;

    let outcome = engine.run_cycle(&CancellationToken::new()).await.unwrap();
    let report = match outcome {
        CycleOutcome::Completed(report) => report,
        CycleOutcome::Cancelled => panic!("cycle was not cancelled"),
    };

    assert_eq!(report.coins, vec!["BTC", "ETH"]);
    assert_eq!(report.positions, 2);
    assert_eq!(report.orphans, 1);
    assert_eq!(report.executed(), 2);
    assert_eq!(report.failed(), 0);

    let snapshot = seen.lock().unwrap()[0].clone();
    assert_eq!(snapshot.account.account_value, 10000.0);
    assert!(snapshot.positions.iter().any(|p| p.symbol == "SOL" && p.is_orphan()));

    assert_eq!(fake.position("BTCUSDT"), 0.012);
    assert_eq!(fake.position("ETHUSDT"), 0.0);
    assert_eq!(engine.commentary(), "Rotate from ETH short into BTC long");

    let tracked = engine.reconciler().snapshot().await;
    assert!(tracked.contains_key("BTC"));
    assert!(!tracked.contains_key("ETH"));

    // Once after the decision, once per executed signal
    assert_eq!(store.save_count().await, 3);
    let saved = store.load().await;
    assert_eq!(saved.portfolio_analysis, "Rotate from ETH short into BTC long");
    assert_eq!(saved.open_positions.keys().collect::<Vec<_>>(), vec!["BTC"]);
}

#[tokio::test]
async fn test_failed_signal_does_not_stop_later_signals() {
    let cfg = test_config(&["BTC", "ETH"]);
    let fake = Arc::new(FakeExchange::new().with_position("ETHUSDT", -2.0));
    let store = Arc::new(MemoryStore::new());

    let decision = Decision {
        portfolio_analysis: String::new(),
        signals: vec![
            entry(SignalKind::BuyToEnter, "DOGE", 10.0),
            close("ETH"),
        ],
    };
    let (mut engine, _) = build_engine(fake.clone(), &cfg, Some(decision), store.clone()).await;
    let previous = engine.commentary().to_string();

    let outcome = engine.run_cycle(&CancellationToken::new()).await.unwrap();
    let CycleOutcome::Completed(report) = outcome else {
        panic!("cycle was not cancelled");
    };

    assert_eq!(report.failed(), 1);
    assert_eq!(report.executed(), 1);
    assert!(report.outcomes[0].error.is_some());
    assert_eq!(fake.position("ETHUSDT"), 0.0);
    // Empty commentary keeps the previous one
    assert_eq!(engine.commentary(), previous);
}

#[tokio::test]
async fn test_failed_decision_leaves_state_untouched() {
    let cfg = test_config(&["BTC"]);
    let fake = Arc::new(FakeExchange::new());
    let store = Arc::new(MemoryStore::new());
    let (mut engine, seen) = build_engine(fake.clone(), &cfg, None, store.clone()).await;
    let before = engine.commentary().to_string();

    let result = engine.run_cycle(&CancellationToken::new()).await;

    assert!(result.is_err());
    assert_eq!(seen.lock().unwrap().len(), 1);
    assert_eq!(engine.commentary(), before);
    assert_eq!(store.save_count().await, 0);
    assert!(fake.orders().is_empty());
}

#[tokio::test]
async fn test_cancelled_cycle_places_no_orders() {
    let cfg = test_config(&["BTC"]);
    let fake = Arc::new(FakeExchange::new());
    let store = Arc::new(MemoryStore::new());
    let decision = Decision {
        portfolio_analysis: "buy".to_string(),
        signals: vec![entry(SignalKind::BuyToEnter, "BTC", 0.01)],
    };
    let (mut engine, seen) = build_engine(fake.clone(), &cfg, Some(decision), store.clone()).await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let outcome = engine.run_cycle(&cancel).await.unwrap();

    assert_eq!(outcome, CycleOutcome::Cancelled);
    assert!(seen.lock().unwrap().is_empty());
    assert!(fake.orders().is_empty());
    assert_eq!(store.save_count().await, 0);
}

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;

use crate::account::AccountTracker;
use crate::collector::MarketCollector;
use crate::config::AppConfig;
use crate::execution::{ExecutionError, OrderExecutor, PositionReconciler};
use crate::llm::DecisionMaker;
use crate::models::{MarketSnapshot, SignalKind, TradeSignal};
use crate::persistence::{PersistedState, StateStore};

/// Result of applying one signal
#[derive(Debug, Clone, PartialEq)]
pub struct SignalOutcome {
    pub kind: SignalKind,
    pub coin: String,
    pub error: Option<String>,
}

/// Summary of a completed decision cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub coins: Vec<String>,
    pub positions: usize,
    pub orphans: usize,
    pub outcomes: Vec<SignalOutcome>,
}

impl CycleReport {
    pub fn executed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.error.is_none()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.error.is_some()).count()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Completed(CycleReport),
    Cancelled,
}

/// Drives one decision cycle: gather, reconcile, decide, execute
pub struct Engine {
    universe: Vec<String>,
    collector: Box<dyn MarketCollector>,
    account: AccountTracker,
    reconciler: PositionReconciler,
    executor: OrderExecutor,
    decision_maker: Box<dyn DecisionMaker>,
    store: Box<dyn StateStore>,
    commentary: String,
    started_at: DateTime<Utc>,
}

impl Engine {
    /// Build the engine, restoring commentary and position metadata from the store
    pub async fn new(
        cfg: &AppConfig,
        collector: Box<dyn MarketCollector>,
        account: AccountTracker,
        executor: OrderExecutor,
        decision_maker: Box<dyn DecisionMaker>,
        store: Box<dyn StateStore>,
    ) -> Self {
        let state = store.load().await;

        Self {
            universe: cfg.asset_universe.clone(),
            collector,
            account,
            reconciler: PositionReconciler::from_state(state.open_positions),
            executor,
            decision_maker,
            store,
            commentary: state.portfolio_analysis,
            started_at: Utc::now(),
        }
    }

    pub fn reconciler(&self) -> &PositionReconciler {
        &self.reconciler
    }

    pub fn commentary(&self) -> &str {
        &self.commentary
    }

    /// Run one cycle
    ///
    /// Account, position or decision failures abort the cycle before any order is
    /// placed. Cancellation during data gathering or the decision call aborts the
    /// cycle; cancellation during execution stops after the signal in flight.
    pub async fn run_cycle(&mut self, cancel: &CancellationToken) -> anyhow::Result<CycleOutcome> {
        let gather = async {
            tokio::join!(
                self.collector.fetch_snapshot(&self.universe),
                self.account.fetch_account(),
                self.collector.fetch_positions(),
            )
        };

        let (coins, account, positions) = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::warn!("Cycle cancelled during data collection");
                return Ok(CycleOutcome::Cancelled);
            }
            gathered = gather => gathered,
        };

        let account = account.context("Account fetch failed")?;
        let positions = positions.context("Position fetch failed")?;
        let positions = self.reconciler.merge(positions).await;

        let snapshot = MarketSnapshot {
            minutes_elapsed: (Utc::now() - self.started_at).num_minutes(),
            coins,
            account,
            positions,
        };

        let mut report = CycleReport {
            coins: snapshot.coins.keys().cloned().collect(),
            positions: snapshot.positions.len(),
            orphans: snapshot.positions.iter().filter(|p| p.is_orphan()).count(),
            outcomes: Vec::new(),
        };

        tracing::info!(
            coins = report.coins.len(),
            positions = report.positions,
            orphans = report.orphans,
            account_value = snapshot.account.account_value,
            "Snapshot ready, requesting decision"
        );

        let decision = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::warn!("Cycle cancelled while waiting for decision");
                return Ok(CycleOutcome::Cancelled);
            }
            decision = self.decision_maker.decide(&snapshot, &self.commentary) => {
                decision.context("Decision-maker failed")?
            }
        };

        if !decision.portfolio_analysis.trim().is_empty() {
            self.commentary = decision.portfolio_analysis.clone();
        }
        self.persist().await;

        for signal in &decision.signals {
            if cancel.is_cancelled() {
                tracing::warn!(
                    remaining = decision.signals.len() - report.outcomes.len(),
                    "Cancelled, skipping remaining signals"
                );
                break;
            }

            let error = match self.apply(signal).await {
                Ok(()) => None,
                Err(e) => {
                    tracing::error!(
                        coin = %signal.coin,
                        signal = %signal.signal,
                        error = %e,
                        "Signal execution failed"
                    );
                    Some(e.to_string())
                }
            };
            report.outcomes.push(SignalOutcome {
                kind: signal.signal,
                coin: signal.coin.clone(),
                error,
            });
        }

        tracing::info!(
            executed = report.executed(),
            failed = report.failed(),
            "Cycle complete"
        );
        Ok(CycleOutcome::Completed(report))
    }

    /// Execute one signal; local metadata changes only after the exchange accepted it
    async fn apply(&self, signal: &TradeSignal) -> Result<(), ExecutionError> {
        match signal.signal {
            SignalKind::BuyToEnter | SignalKind::SellToEnter => {
                self.executor.enter(signal).await?;
                self.reconciler.add(signal).await;
            }
            SignalKind::Close => {
                self.executor.close(&signal.coin).await?;
                self.reconciler.remove(&signal.coin).await;
            }
        }
        self.persist().await;
        Ok(())
    }

    /// Save commentary and metadata; a failed write is logged, not fatal
    async fn persist(&self) {
        let state = PersistedState {
            portfolio_analysis: self.commentary.clone(),
            open_positions: self.reconciler.snapshot().await,
        };
        if let Err(e) = self.store.save(&state).await {
            tracing::error!(error = %e, "Failed to persist state");
        }
    }
}

/// Next wall-clock multiple of `interval`; `now` itself when already on a boundary
pub fn next_boundary(now: DateTime<Utc>, interval: std::time::Duration) -> DateTime<Utc> {
    let step = interval.as_secs().max(1) as i64;
    let remainder = now.timestamp().rem_euclid(step);
    let subsec = now.timestamp_subsec_nanos() as i64;

    if remainder == 0 && subsec == 0 {
        return now;
    }
    now + Duration::seconds(step - remainder) - Duration::nanoseconds(subsec)
}

/// Time to wait from `now` until the next boundary
pub fn delay_until_boundary(
    now: DateTime<Utc>,
    interval: std::time::Duration,
) -> std::time::Duration {
    (next_boundary(now, interval) - now)
        .to_std()
        .unwrap_or_default()
}

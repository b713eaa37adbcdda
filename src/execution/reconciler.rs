use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::models::{ExitPlan, PositionView, TradeMetadata, TradeSignal};

/// Local trade metadata keyed by bare coin, merged into exchange positions each cycle
#[derive(Debug, Default)]
pub struct PositionReconciler {
    positions: RwLock<HashMap<String, TradeMetadata>>,
}

impl PositionReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore from persisted state
    pub fn from_state(positions: HashMap<String, TradeMetadata>) -> Self {
        Self {
            positions: RwLock::new(positions),
        }
    }

    /// Record an executed entry; non-entry signals are ignored and return false
    pub async fn add(&self, signal: &TradeSignal) -> bool {
        self.add_at(signal, Utc::now()).await
    }

    pub async fn add_at(&self, signal: &TradeSignal, entry_time: DateTime<Utc>) -> bool {
        if !signal.signal.is_entry() {
            tracing::warn!(
                coin = %signal.coin,
                signal = %signal.signal,
                "Ignoring non-entry signal"
            );
            return false;
        }

        let metadata = signal.to_metadata(entry_time);
        self.positions
            .write()
            .await
            .insert(signal.coin.clone(), metadata);
        tracing::info!(coin = %signal.coin, "Tracking new position");
        true
    }

    pub async fn remove(&self, coin: &str) -> Option<TradeMetadata> {
        let removed = self.positions.write().await.remove(coin);
        if removed.is_some() {
            tracing::info!(coin, "Stopped tracking position");
        }
        removed
    }

    pub async fn get(&self, coin: &str) -> Option<TradeMetadata> {
        self.positions.read().await.get(coin).cloned()
    }

    /// Copy of the full mapping
    pub async fn snapshot(&self) -> HashMap<String, TradeMetadata> {
        self.positions.read().await.clone()
    }

    /// Enrich exchange positions with local metadata as of now
    pub async fn merge(&self, positions: Vec<PositionView>) -> Vec<PositionView> {
        let metadata = self.positions.read().await;
        merge_positions(positions, &metadata, Utc::now())
    }
}

/// Copy exit plan, confidence and risk onto positions we hold metadata for
///
/// Positions without metadata are orphans: left unenriched and logged.
pub fn merge_positions(
    positions: Vec<PositionView>,
    metadata: &HashMap<String, TradeMetadata>,
    now: DateTime<Utc>,
) -> Vec<PositionView> {
    positions
        .into_iter()
        .map(|mut position| {
            match metadata.get(&position.symbol) {
                Some(meta) => {
                    position.exit_plan = Some(ExitPlan {
                        profit_target: meta.profit_target,
                        stop_loss: meta.stop_loss,
                        invalidation_condition: meta.invalidation_condition.clone(),
                    });
                    position.confidence = Some(meta.confidence);
                    position.risk_usd = Some(meta.risk_usd);
                    position.age_minutes = Some((now - meta.entry_time).num_minutes());
                }
                None => {
                    tracing::warn!(
                        symbol = %position.symbol,
                        quantity = position.quantity,
                        "Orphan position: open on exchange with no local metadata"
                    );
                }
            }
            position
        })
        .collect()
}

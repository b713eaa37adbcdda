use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::models::TradeMetadata;
use crate::Result;

/// Commentary used when no prior analysis exists
pub const DEFAULT_PORTFOLIO_ANALYSIS: &str = "No positions are open and no prior analysis exists. \
The market is a blank slate. My immediate goal is to analyze the full dataset provided, establish \
a market baseline, and find a single, high-quality entry point that aligns with the risk management protocol.";

/// State that survives restarts: last commentary plus open-position metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedState {
    pub portfolio_analysis: String,
    #[serde(default)]
    pub open_positions: HashMap<String, TradeMetadata>,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            portfolio_analysis: DEFAULT_PORTFOLIO_ANALYSIS.to_string(),
            open_positions: HashMap::new(),
        }
    }
}

/// Load/save of the persisted blob
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Missing or unreadable state yields the default, never an error
    async fn load(&self) -> PersistedState;

    async fn save(&self, state: &PersistedState) -> Result<()>;
}

/// JSON file store; writes go to a sibling temp file and are renamed into place
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn load(&self) -> PersistedState {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "No persisted state, starting fresh");
                return PersistedState::default();
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to read persisted state, using defaults"
                );
                return PersistedState::default();
            }
        };

        match serde_json::from_slice::<PersistedState>(&bytes) {
            Ok(state) => {
                tracing::info!(
                    path = %self.path.display(),
                    open_positions = state.open_positions.len(),
                    "Loaded persisted state"
                );
                state
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Corrupt persisted state, using defaults"
                );
                PersistedState::default()
            }
        }
    }

    async fn save(&self, state: &PersistedState) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let json = serde_json::to_vec_pretty(state)?;

        let temp = self.temp_path();
        tokio::fs::write(&temp, &json).await?;
        tokio::fs::rename(&temp, &self.path).await?;

        tracing::debug!(path = %self.path.display(), bytes = json.len(), "Persisted state");
        Ok(())
    }
}

/// In-memory store for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<Option<PersistedState>>,
    saves: Mutex<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: PersistedState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
            saves: Mutex::new(0),
        }
    }

    /// Number of successful saves so far
    pub async fn save_count(&self) -> usize {
        *self.saves.lock().await
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load(&self) -> PersistedState {
        self.state.lock().await.clone().unwrap_or_default()
    }

    async fn save(&self, state: &PersistedState) -> Result<()> {
        *self.state.lock().await = Some(state.clone());
        *self.saves.lock().await += 1;
        Ok(())
    }
}

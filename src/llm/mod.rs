// Decision-maker: contract and OpenAI-compatible implementation
pub mod agent;
pub mod parse;

pub use agent::{LlmAgent, Provider};
pub use parse::{parse_decision, sanitize_signals, SignalBounds};

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Decision, MarketSnapshot};

#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("LLM API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("LLM returned an empty response")]
    EmptyResponse,

    #[error("Failed to parse decision: {0}")]
    Parse(String),
}

/// Turns a market snapshot and the previous commentary into trade signals
///
/// Called at most once per cycle and never retried.
#[async_trait]
pub trait DecisionMaker: Send + Sync {
    async fn decide(
        &self,
        snapshot: &MarketSnapshot,
        commentary: &str,
    ) -> Result<Decision, DecisionError>;
}

//! Chat-completions client that produces trading decisions
//!
//! Works against OpenAI or any OpenAI-compatible endpoint (Volcengine Ark).
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::parse::{parse_decision, sanitize_signals, SignalBounds};
use super::{DecisionError, DecisionMaker};
use crate::config::AppConfig;
use crate::models::{Decision, MarketSnapshot};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const REQUEST_TIMEOUT_SECS: u64 = 120; // Reasoning models can take a while

const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
const ENV_VOLC_API_KEY: &str = "VOLC_API_KEY";
const ENV_VOLC_BASE_URL: &str = "VOLC_BASE_URL";

const SYSTEM_PROMPT: &str = "You are an autonomous trader on USDT-margined perpetual futures. \
You receive a JSON object with current market data, account performance, open positions and \
your previous portfolio analysis. Respond with a single JSON object: \
{\"portfolio_analysis\": string, \"actions\": [{\"signal\": \"buy_to_enter\" | \"sell_to_enter\" | \"close\", \
\"coin\": string, \"quantity\": number, \"leverage\": integer, \"profit_target\": number, \
\"stop_loss\": number, \"invalidation_condition\": string, \"confidence\": number between 0 and 1, \
\"risk_usd\": number, \"justification\": string}]}. Use an empty actions array to hold.";

/// Where chat completions are sent, resolved from the model name
pub enum Provider {
    OpenAi { api_key: SecretString },
    Volc { api_key: SecretString, base_url: String },
}

impl Provider {
    /// `gpt-*` models go to OpenAI; everything else to the Volcengine-compatible endpoint
    pub fn resolve(model: &str) -> Result<Self, DecisionError> {
        Self::resolve_with(model, |key| std::env::var(key).ok())
    }

    pub fn resolve_with<F>(model: &str, lookup: F) -> Result<Self, DecisionError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if model.starts_with("gpt-") {
            let api_key = non_empty(ENV_OPENAI_API_KEY).ok_or_else(|| {
                DecisionError::MissingCredentials(format!(
                    "{} not set for model {}",
                    ENV_OPENAI_API_KEY, model
                ))
            })?;
            return Ok(Provider::OpenAi {
                api_key: SecretString::from(api_key),
            });
        }

        match (non_empty(ENV_VOLC_API_KEY), non_empty(ENV_VOLC_BASE_URL)) {
            (Some(api_key), Some(base_url)) => Ok(Provider::Volc {
                api_key: SecretString::from(api_key),
                base_url,
            }),
            _ => Err(DecisionError::MissingCredentials(format!(
                "{} or {} not set for model {}",
                ENV_VOLC_API_KEY, ENV_VOLC_BASE_URL, model
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Provider::OpenAi { .. } => "openai",
            Provider::Volc { .. } => "volc",
        }
    }

    fn api_key(&self) -> &str {
        match self {
            Provider::OpenAi { api_key } | Provider::Volc { api_key, .. } => {
                api_key.expose_secret()
            }
        }
    }

    fn completions_url(&self) -> String {
        let base = match self {
            Provider::OpenAi { .. } => OPENAI_BASE_URL,
            Provider::Volc { base_url, .. } => base_url.as_str(),
        };
        format!("{}/chat/completions", base.trim_end_matches('/'))
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.name())
            .field("url", &self.completions_url())
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Debug, Deserialize)]
struct MessageContent {
    #[serde(default)]
    content: Option<String>,
}

/// Payload sent as the user message
#[derive(Debug, Serialize)]
struct DecisionRequest<'a> {
    market: &'a MarketSnapshot,
    previous_analysis: &'a str,
}

pub struct LlmAgent {
    client: reqwest::Client,
    provider: Provider,
    model: String,
    temperature: f32,
    bounds: SignalBounds,
}

impl LlmAgent {
    /// Build from configuration, reading credentials from the environment
    pub fn from_config(cfg: &AppConfig) -> Result<Self, DecisionError> {
        let provider = Provider::resolve(&cfg.model)?;
        Self::new(provider, cfg)
    }

    pub fn new(provider: Provider, cfg: &AppConfig) -> Result<Self, DecisionError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        tracing::info!(model = %cfg.model, provider = provider.name(), "Decision agent ready");

        Ok(Self {
            client,
            provider,
            model: cfg.model.clone(),
            temperature: cfg.llm_temperature,
            bounds: SignalBounds::from_config(cfg),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(
        &self,
        snapshot: &MarketSnapshot,
        commentary: &str,
    ) -> Result<ChatRequest<'_>, DecisionError> {
        let payload = serde_json::to_string(&DecisionRequest {
            market: snapshot,
            previous_analysis: commentary,
        })
        .map_err(|e| DecisionError::Parse(format!("failed to encode snapshot: {}", e)))?;

        Ok(ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            response_format: ResponseFormat {
                kind: "json_object",
            },
            messages: vec![
                Message {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                Message {
                    role: "user",
                    content: payload,
                },
            ],
        })
    }
}

#[async_trait]
impl DecisionMaker for LlmAgent {
    async fn decide(
        &self,
        snapshot: &MarketSnapshot,
        commentary: &str,
    ) -> Result<Decision, DecisionError> {
        let request = self.build_request(snapshot, commentary)?;

        let response = self
            .client
            .post(self.provider.completions_url())
            .bearer_auth(self.provider.api_key())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DecisionError::Api {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        let completion: ChatResponse = response.json().await?;
        let text = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|t| !t.trim().is_empty())
            .ok_or(DecisionError::EmptyResponse)?;

        let mut decision = parse_decision(&text)?;
        let received = decision.signals.len();
        decision.signals = sanitize_signals(decision.signals, self.bounds);

        tracing::info!(
            model = %self.model,
            signals = decision.signals.len(),
            dropped = received - decision.signals.len(),
            "Decision received"
        );
        Ok(decision)
    }
}

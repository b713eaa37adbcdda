use serde::Deserialize;

use super::DecisionError;
use crate::config::AppConfig;
use crate::models::{Decision, TradeSignal};

/// Limits applied to signals before they reach the executor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalBounds {
    pub min_leverage: u32,
    pub max_leverage: u32,
}

impl SignalBounds {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            min_leverage: cfg.min_leverage,
            max_leverage: cfg.max_leverage,
        }
    }
}

impl Default for SignalBounds {
    fn default() -> Self {
        Self {
            min_leverage: 1,
            max_leverage: 20,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawDecision {
    #[serde(default)]
    portfolio_analysis: String,
    #[serde(default)]
    actions: Vec<serde_json::Value>,
}

/// Strip markdown fences and keep the outermost JSON object
fn extract_json(text: &str) -> Option<&str> {
    let mut text = text.trim();
    if text.starts_with("```") {
        text = text
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim();
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

/// Parse a model reply into a decision
///
/// Actions that do not decode (unknown signal kinds such as "hold", missing coin)
/// are dropped with a warning rather than failing the whole decision.
pub fn parse_decision(text: &str) -> Result<Decision, DecisionError> {
    let json = extract_json(text)
        .ok_or_else(|| DecisionError::Parse(format!("no JSON object in reply: {:.200}", text)))?;
    let raw: RawDecision =
        serde_json::from_str(json).map_err(|e| DecisionError::Parse(e.to_string()))?;

    let signals = raw
        .actions
        .into_iter()
        .filter_map(|mut action| {
            // Models sometimes emit leverage as 10.0
            if let Some(lev) = action.get("leverage").and_then(|v| v.as_f64()) {
                if lev.is_finite() && lev >= 0.0 {
                    action["leverage"] = serde_json::json!(lev.round() as u64);
                }
            }
            match serde_json::from_value::<TradeSignal>(action.clone()) {
                Ok(signal) => Some(signal),
                Err(e) => {
                    tracing::warn!(action = %action, error = %e, "Dropping undecodable action");
                    None
                }
            }
        })
        .collect();

    Ok(Decision {
        portfolio_analysis: raw.portfolio_analysis,
        signals,
    })
}

/// Normalise coins, clamp leverage and confidence, reject unusable entries
pub fn sanitize_signals(signals: Vec<TradeSignal>, bounds: SignalBounds) -> Vec<TradeSignal> {
    signals
        .into_iter()
        .filter_map(|mut signal| {
            signal.coin = signal.coin.trim().to_uppercase();
            if signal.coin.is_empty() {
                tracing::warn!(signal = %signal.signal, "Dropping signal without coin");
                return None;
            }

            if signal.signal.is_entry() {
                if !(signal.quantity.is_finite() && signal.quantity > 0.0) {
                    tracing::warn!(
                        coin = %signal.coin,
                        quantity = signal.quantity,
                        "Dropping entry with non-positive quantity"
                    );
                    return None;
                }
                signal.leverage = signal.leverage.clamp(bounds.min_leverage, bounds.max_leverage);
            }

            signal.confidence = if signal.confidence.is_finite() {
                signal.confidence.clamp(0.0, 1.0)
            } else {
                0.0
            };
            Some(signal)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SignalKind;

    #[test]
    fn test_parse_fenced_reply() {
        let reply = "```json\n{\"portfolio_analysis\": \"flat\", \"actions\": [\
            {\"signal\": \"buy_to_enter\", \"coin\": \"BTC\", \"quantity\": 0.01, \"leverage\": 5,\
             \"profit_target\": 70000, \"stop_loss\": 60000, \"invalidation_condition\": \"x\",\
             \"confidence\": 0.7, \"risk_usd\": 50, \"justification\": \"y\"}]}\n```";
        let decision = parse_decision(reply).unwrap();

        assert_eq!(decision.portfolio_analysis, "flat");
        assert_eq!(decision.signals.len(), 1);
        assert_eq!(decision.signals[0].signal, SignalKind::BuyToEnter);
        assert_eq!(decision.signals[0].leverage, 5);
    }

    #[test]
    fn test_parse_drops_unknown_signal_kinds() {
        let reply = r#"Sure! {"portfolio_analysis": "wait", "actions": [
            {"signal": "hold", "coin": "ETH"},
            {"signal": "close", "coin": "SOL"}
        ]} hope this helps"#;
        let decision = parse_decision(reply).unwrap();

        assert_eq!(decision.signals.len(), 1);
        assert_eq!(decision.signals[0].coin, "SOL");
    }

    #[test]
    fn test_parse_float_leverage() {
        let reply = r#"{"portfolio_analysis": "", "actions": [
            {"signal": "sell_to_enter", "coin": "ETH", "quantity": 1, "leverage": 10.0}
        ]}"#;
        let decision = parse_decision(reply).unwrap();
        assert_eq!(decision.signals[0].leverage, 10);
    }

    #[test]
    fn test_parse_rejects_non_json() {
        assert!(matches!(
            parse_decision("I cannot help with that."),
            Err(DecisionError::Parse(_))
        ));
    }

    #[test]
    fn test_sanitize_clamps_and_filters() {
        let base = TradeSignal {
            signal: SignalKind::BuyToEnter,
            coin: " btc ".to_string(),
            quantity: 0.5,
            leverage: 50,
            profit_target: 0.0,
            stop_loss: 0.0,
            invalidation_condition: String::new(),
            confidence: 1.4,
            risk_usd: 0.0,
            justification: String::new(),
        };
        let zero_qty = TradeSignal {
            quantity: 0.0,
            ..base.clone()
        };
        let close = TradeSignal {
            signal: SignalKind::Close,
            quantity: 0.0,
            leverage: 0,
            confidence: -1.0,
            ..base.clone()
        };

        let out = sanitize_signals(vec![base, zero_qty, close], SignalBounds::default());

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].coin, "BTC");
        assert_eq!(out[0].leverage, 20);
        assert_eq!(out[0].confidence, 1.0);
        // Close keeps its zero quantity and leverage
        assert_eq!(out[1].signal, SignalKind::Close);
        assert_eq!(out[1].leverage, 0);
        assert_eq!(out[1].confidence, 0.0);
    }
}

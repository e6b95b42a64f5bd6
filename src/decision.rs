//! # decision
//!
//! The core does not know how an agent makes up its mind. On every tick it
//! hands the agent record, a portfolio snapshot and a market snapshot to a
//! [`DecisionProvider`] and acts on the returned [`Decision`].
//!
//! Model-backed providers (GPT / Claude / Qwen) plug in behind this trait.
//! Two deterministic providers ship with the crate:
//! * [`HoldProvider`]: never trades, the server default
//! * [`ScriptedProvider`]: replays queued decisions per agent

use std::collections::{HashMap, VecDeque};

use anyhow::bail;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::{Agent, MarketSnapshot, PortfolioSnapshot, TradeAction, TradeRequest};

// ─── Decision ─────────────────────────────────────────────────────────────────

/// What the provider wants done this tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Decision {
    Hold {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reasoning: Option<String>,
    },
    Buy {
        symbol:    String,
        quantity:  u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reasoning: Option<String>,
    },
    Sell {
        symbol:    String,
        quantity:  u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reasoning: Option<String>,
    },
}

impl Decision {
    pub fn hold() -> Self {
        Decision::Hold { reasoning: None }
    }

    pub fn buy(symbol: impl Into<String>, quantity: u64) -> Self {
        Decision::Buy { symbol: symbol.into(), quantity, reasoning: None }
    }

    pub fn sell(symbol: impl Into<String>, quantity: u64) -> Self {
        Decision::Sell { symbol: symbol.into(), quantity, reasoning: None }
    }

    pub fn is_hold(&self) -> bool {
        matches!(self, Decision::Hold { .. })
    }

    /// Convert into an order. `Ok(None)` for hold; an incomplete intent (empty
    /// symbol or zero quantity) is an error.
    pub fn into_request(self) -> anyhow::Result<Option<TradeRequest>> {
        let (action, symbol, quantity, reasoning) = match self {
            Decision::Hold { .. } => return Ok(None),
            Decision::Buy { symbol, quantity, reasoning } => (TradeAction::Buy, symbol, quantity, reasoning),
            Decision::Sell { symbol, quantity, reasoning } => (TradeAction::Sell, symbol, quantity, reasoning),
        };

        if symbol.trim().is_empty() {
            bail!("decision to {action} has no symbol");
        }
        if quantity == 0 {
            bail!("decision to {action} {symbol} has zero quantity");
        }

        Ok(Some(TradeRequest { symbol, action, quantity, reasoning }))
    }
}

// ─── Provider Trait ───────────────────────────────────────────────────────────

#[async_trait]
pub trait DecisionProvider: Send + Sync {
    async fn decide(
        &self,
        agent: &Agent,
        portfolio: &PortfolioSnapshot,
        market: &MarketSnapshot,
    ) -> anyhow::Result<Decision>;
}

// ─── HoldProvider ─────────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy)]
pub struct HoldProvider;

#[async_trait]
impl DecisionProvider for HoldProvider {
    async fn decide(
        &self,
        _agent: &Agent,
        _portfolio: &PortfolioSnapshot,
        _market: &MarketSnapshot,
    ) -> anyhow::Result<Decision> {
        Ok(Decision::Hold { reasoning: Some("no model provider configured".into()) })
    }
}

// ─── ScriptedProvider ─────────────────────────────────────────────────────────

/// Scripted step: a decision, or a failure to surface from `decide`.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Decide(Decision),
    Fail(String),
}

impl From<Decision> for ScriptStep {
    fn from(decision: Decision) -> Self {
        ScriptStep::Decide(decision)
    }
}

/// Pops one queued step per call for the calling agent; an exhausted queue
/// holds.
#[derive(Default)]
pub struct ScriptedProvider {
    scripts: Mutex<HashMap<Uuid, VecDeque<ScriptStep>>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, agent_id: Uuid, step: impl Into<ScriptStep>) {
        let mut scripts = self.scripts.lock().await;
        scripts.entry(agent_id).or_default().push_back(step.into());
    }

    pub async fn extend<I>(&self, agent_id: Uuid, steps: I)
    where
        I: IntoIterator,
        I::Item: Into<ScriptStep>,
    {
        let mut scripts = self.scripts.lock().await;
        scripts.entry(agent_id).or_default().extend(steps.into_iter().map(Into::into));
    }
}

#[async_trait]
impl DecisionProvider for ScriptedProvider {
    async fn decide(
        &self,
        agent: &Agent,
        _portfolio: &PortfolioSnapshot,
        _market: &MarketSnapshot,
    ) -> anyhow::Result<Decision> {
        let step = {
            let mut scripts = self.scripts.lock().await;
            scripts.get_mut(&agent.id).and_then(VecDeque::pop_front)
        };

        match step {
            Some(ScriptStep::Decide(decision)) => Ok(decision),
            Some(ScriptStep::Fail(reason)) => bail!("scripted failure: {reason}"),
            None => Ok(Decision::hold()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_wire_format() {
        let json = serde_json::to_value(Decision::buy("AAPL", 10)).unwrap();
        assert_eq!(json, serde_json::json!({ "action": "buy", "symbol": "AAPL", "quantity": 10 }));

        let parsed: Decision = serde_json::from_str(r#"{"action":"hold"}"#).unwrap();
        assert!(parsed.is_hold());
    }

    #[test]
    fn test_incomplete_intent_rejected() {
        assert!(Decision::buy("", 5).into_request().is_err());
        assert!(Decision::sell("AAPL", 0).into_request().is_err());
        assert_eq!(Decision::hold().into_request().unwrap(), None);

        let req = Decision::sell("AAPL", 5).into_request().unwrap().unwrap();
        assert_eq!(req, TradeRequest::sell("AAPL", 5));
    }
}

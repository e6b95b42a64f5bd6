//! # models::trade
//!
//! Defines [`Trade`], the immutable record of one fill, and
//! [`TradeRequest`], the order intent the ledger turns into a trade.
//!
//! A `Trade` is only ever minted by a successful `Ledger::apply_trade`, so
//! holding one is proof that cash and positions were updated for it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── TradeAction ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeAction {
    Buy,
    Sell,
}

impl TradeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeAction::Buy  => "buy",
            TradeAction::Sell => "sell",
        }
    }
}

impl std::fmt::Display for TradeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TradeAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buy"  => Ok(TradeAction::Buy),
            "sell" => Ok(TradeAction::Sell),
            other  => Err(format!("unknown trade action '{other}'")),
        }
    }
}

// ─── TradeRequest ─────────────────────────────────────────────────────────────

/// What an agent wants to do. Carries no price: the fill price is decided by
/// whoever executes the order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeRequest {
    pub symbol:    String,
    pub action:    TradeAction,
    pub quantity:  u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl TradeRequest {
    pub fn buy(symbol: impl Into<String>, quantity: u64) -> Self {
        Self { symbol: symbol.into(), action: TradeAction::Buy, quantity, reasoning: None }
    }

    pub fn sell(symbol: impl Into<String>, quantity: u64) -> Self {
        Self { symbol: symbol.into(), action: TradeAction::Sell, quantity, reasoning: None }
    }
}

// ─── Trade ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub id:        Uuid,
    pub agent_id:  Uuid,
    pub symbol:    String,
    pub action:    TradeAction,
    pub quantity:  u64,
    /// Fill price.
    pub price:     f64,
    pub timestamp: DateTime<Utc>,
    /// Realized P&L against the average cost. Only set on sells.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profit:    Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl Trade {
    /// The request that would reproduce this fill when replayed.
    pub fn to_request(&self) -> TradeRequest {
        TradeRequest {
            symbol:    self.symbol.clone(),
            action:    self.action,
            quantity:  self.quantity,
            reasoning: self.reasoning.clone(),
        }
    }
}

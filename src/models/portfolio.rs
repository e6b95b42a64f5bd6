//! # models::portfolio
//!
//! [`Position`] is one open holding with cost-basis accounting.
//! [`PortfolioSnapshot`] is the read-only view of an account that tools and
//! decision providers receive.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::PriceUpdate;

// ─── Position ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub symbol:              String,
    pub quantity:            u64,
    /// Weighted mean cost; only buys move it.
    pub average_price:       f64,
    pub current_price:       f64,
    pub profit_loss:         f64,
    pub profit_loss_percent: f64,
}

impl Position {
    pub fn open(symbol: &str, quantity: u64, price: f64) -> Self {
        Self {
            symbol:              symbol.to_string(),
            quantity,
            average_price:       price,
            current_price:       price,
            profit_loss:         0.0,
            profit_loss_percent: 0.0,
        }
    }

    /// Overwrite the market price and recompute the derived P&L fields.
    pub fn mark(&mut self, price: f64) {
        self.current_price = price;
        self.profit_loss = (price - self.average_price) * self.quantity as f64;
        self.profit_loss_percent = if self.average_price > 0.0 {
            (price - self.average_price) / self.average_price * 100.0
        } else {
            0.0
        };
    }

    #[inline]
    pub fn market_value(&self) -> f64 {
        self.quantity as f64 * self.current_price
    }
}

// ─── PortfolioSnapshot ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioSnapshot {
    pub agent_id:    Uuid,
    pub cash:        f64,
    /// Ordered by symbol.
    pub positions:   Vec<Position>,
    pub total_value: f64,
}

impl PortfolioSnapshot {
    /// What an unknown account looks like.
    pub fn empty(agent_id: Uuid) -> Self {
        Self { agent_id, cash: 0.0, positions: Vec::new(), total_value: 0.0 }
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.iter().find(|p| p.symbol == symbol)
    }

    pub fn holds(&self, symbol: &str) -> bool {
        self.position(symbol).is_some()
    }

    /// This view revalued at `updates`. The account it was read from is
    /// untouched. Same filtering as `Ledger::update_market_prices`.
    pub fn marked(mut self, updates: &[PriceUpdate]) -> Self {
        for update in updates {
            if !update.price.is_finite() || update.price <= 0.0 {
                continue;
            }
            if let Some(pos) = self.positions.iter_mut().find(|p| p.symbol == update.symbol) {
                pos.mark(update.price);
            }
        }
        self.total_value = self.cash + self.positions.iter().map(Position::market_value).sum::<f64>();
        self
    }
}

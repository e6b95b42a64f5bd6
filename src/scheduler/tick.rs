//! # scheduler::tick
//!
//! One tick of an agent's strategy:
//!
//! ```text
//!  gate (try_lock) ──busy──▶ Skipped(Busy)
//!     │
//!  registry: agent active? ──no──▶ Skipped(Missing | Inactive)
//!     │
//!  get_portfolio ─▶ get_market_data × (watchlist ∪ held)
//!     │
//!  snapshot marked to the quotes ─▶ DecisionProvider::decide
//!     │
//!  hold ──▶ Held
//!  order ─▶ place_order (fills + records the trade) ─▶ TRADE_EXECUTED
//! ```
//!
//! The runner never touches the Ledger itself; every read and write goes
//! through the tool dispatcher.
//!
//! Every failure is contained here: logged at `warn`, broadcast as
//! `TICK_FAILED`, returned as [`TickOutcome::Failed`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::Utc;
use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::decision::DecisionProvider;
use crate::events::WsEvent;
use crate::models::{Agent, MarketData, MarketSnapshot, PortfolioSnapshot, Trade};
use crate::scheduler::registry::AgentRegistry;
use crate::tools::builtin::{GET_MARKET_DATA, GET_PORTFOLIO, PLACE_ORDER};
use crate::tools::ToolRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Agent no longer exists.
    Missing,
    /// Agent exists but is stopped.
    Inactive,
    /// Previous tick for this agent still running.
    Busy,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Skipped(SkipReason),
    Held,
    Traded(Trade),
    Failed(String),
}

pub struct TickRunner {
    agents:      Arc<AgentRegistry>,
    tools:       Arc<ToolRegistry>,
    decisions:   Arc<dyn DecisionProvider>,
    events:      broadcast::Sender<String>,
    gates:       DashMap<Uuid, Arc<Mutex<()>>>,
    tick_count:  AtomicU64,
    trade_count: AtomicU64,
}

impl TickRunner {
    pub fn new(
        agents: Arc<AgentRegistry>,
        tools: Arc<ToolRegistry>,
        decisions: Arc<dyn DecisionProvider>,
        events: broadcast::Sender<String>,
    ) -> Self {
        Self {
            agents,
            tools,
            decisions,
            events,
            gates:       DashMap::new(),
            tick_count:  AtomicU64::new(0),
            trade_count: AtomicU64::new(0),
        }
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count.load(Ordering::Relaxed)
    }

    pub fn trade_count(&self) -> u64 {
        self.trade_count.load(Ordering::Relaxed)
    }

    /// Drop the serialization gate of a deleted agent.
    pub fn forget(&self, agent_id: Uuid) {
        self.gates.remove(&agent_id);
    }

    fn gate(&self, agent_id: Uuid) -> Arc<Mutex<()>> {
        Arc::clone(self.gates.entry(agent_id).or_default().value())
    }

    pub async fn execute_agent_strategy(&self, agent_id: Uuid) -> TickOutcome {
        let gate = self.gate(agent_id);
        let Ok(_running) = gate.try_lock() else {
            debug!(agent_id = %agent_id, "Tick skipped, previous tick still running");
            WsEvent::TickSkipped { agent_id, reason: "previous tick still running".into() }
                .send(&self.events);
            return TickOutcome::Skipped(SkipReason::Busy);
        };

        self.tick_count.fetch_add(1, Ordering::Relaxed);

        let Some(agent) = self.agents.get(agent_id).await else {
            self.forget(agent_id);
            return TickOutcome::Skipped(SkipReason::Missing);
        };
        if !agent.is_active {
            debug!(agent_id = %agent_id, "Tick skipped, agent inactive");
            return TickOutcome::Skipped(SkipReason::Inactive);
        }

        match self.tick(&agent).await {
            Ok(None) => {
                debug!(agent_id = %agent_id, "Tick held");
                TickOutcome::Held
            }
            Ok(Some(trade)) => TickOutcome::Traded(trade),
            Err(e) => {
                let reason = format!("{e:#}");
                warn!(agent_id = %agent_id, error = %reason, "⚠️ Tick failed");
                WsEvent::TickFailed { agent_id, reason: reason.clone() }.send(&self.events);
                TickOutcome::Failed(reason)
            }
        }
    }

    async fn tick(&self, agent: &Agent) -> anyhow::Result<Option<Trade>> {
        // ── 1. Quotes for the watchlist and everything held ───────────────────
        let holdings: PortfolioSnapshot = serde_json::from_value(
            self.tools
                .invoke(GET_PORTFOLIO, json!({ "agentId": agent.id.to_string() }))
                .await?,
        )?;

        let mut symbols = agent.watchlist.clone();
        for position in &holdings.positions {
            if !symbols.contains(&position.symbol) {
                symbols.push(position.symbol.clone());
            }
        }

        let mut quotes = Vec::with_capacity(symbols.len());
        for symbol in &symbols {
            match self.tools.invoke(GET_MARKET_DATA, json!({ "symbol": symbol })).await {
                Ok(value) => quotes.push(serde_json::from_value::<MarketData>(value)?),
                Err(e) => warn!(agent_id = %agent.id, symbol = %symbol, error = %e, "Quote unavailable"),
            }
        }
        if quotes.is_empty() && !symbols.is_empty() {
            bail!("no market data for any of {symbols:?}");
        }

        let market = MarketSnapshot { quotes, taken_at: Utc::now() };

        // ── 2. Value the holdings at the fresh quotes ─────────────────────────
        let portfolio = holdings.marked(&market.price_updates());

        // ── 3. Decide ─────────────────────────────────────────────────────────
        let decision = self
            .decisions
            .decide(agent, &portfolio, &market)
            .await
            .context("decision provider failed")?;

        let Some(request) = decision.into_request()? else {
            return Ok(None);
        };

        // ── 4. Execute through the tool protocol ──────────────────────────────
        let mut order = json!({
            "agentId":  agent.id.to_string(),
            "symbol":   request.symbol,
            "action":   request.action.as_str(),
            "quantity": request.quantity,
        });
        if let Some(reasoning) = &request.reasoning {
            order["reasoning"] = Value::String(reasoning.clone());
        }

        let filled = self.tools.invoke(PLACE_ORDER, order).await?;
        let trade: Trade = serde_json::from_value(filled["trade"].clone())
            .context("place_order returned no trade")?;
        let total_return = filled["totalReturn"].as_f64().unwrap_or(0.0);

        // ── 5. Report ─────────────────────────────────────────────────────────
        self.trade_count.fetch_add(1, Ordering::Relaxed);

        info!(
            agent_id     = %agent.id,
            symbol       = %trade.symbol,
            action       = %trade.action,
            quantity     = trade.quantity,
            price        = trade.price,
            total_return,
            "✅ Agent traded"
        );

        WsEvent::TradeExecuted {
            agent_id: agent.id,
            trade: Box::new(trade.clone()),
            total_return,
        }
        .send(&self.events);

        Ok(Some(trade))
    }
}

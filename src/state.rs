//! # state
//!
//! Wires the core together and shares it with every axum handler:
//! registry, ledger, tool dispatcher, scheduler and the event channel.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::backtest::Backtester;
use crate::config::Config;
use crate::decision::DecisionProvider;
use crate::events::WsEvent;
use crate::ledger::Ledger;
use crate::market::MarketDataProvider;
use crate::scheduler::{AgentRegistry, Scheduler};
use crate::tools::{register_builtin_tools, ToolRegistry};

pub struct AppState {
    pub config:       Config,
    pub scheduler:    Scheduler,
    pub tools:        Arc<ToolRegistry>,
    pub ledger:       Arc<Ledger>,
    /// Pre-serialized [`WsEvent`] JSON for monitor clients.
    pub broadcast_tx: broadcast::Sender<String>,
    pub started_at:   DateTime<Utc>,
}

impl AppState {
    pub async fn new(
        config: Config,
        market: Arc<dyn MarketDataProvider>,
        decisions: Arc<dyn DecisionProvider>,
    ) -> Self {
        let (broadcast_tx, _) = broadcast::channel(config.event_buffer.max(1));

        let agents = Arc::new(AgentRegistry::new());
        let ledger = Arc::new(Ledger::new());
        let tools = Arc::new(ToolRegistry::new());

        let backtester = Arc::new(Backtester::new(
            Arc::clone(&agents),
            Arc::clone(&market),
            Arc::clone(&decisions),
        ));
        register_builtin_tools(&tools, Arc::clone(&agents), Arc::clone(&ledger), market, backtester).await;

        let scheduler = Scheduler::new(
            &config,
            agents,
            Arc::clone(&ledger),
            Arc::clone(&tools),
            decisions,
            broadcast_tx.clone(),
        );

        Self {
            config,
            scheduler,
            tools,
            ledger,
            broadcast_tx,
            started_at: Utc::now(),
        }
    }

    pub fn broadcast(&self, event: &WsEvent) {
        event.send(&self.broadcast_tx);
    }
}

pub type SharedState = Arc<AppState>;

pub async fn build_state(
    config: Config,
    market: Arc<dyn MarketDataProvider>,
    decisions: Arc<dyn DecisionProvider>,
) -> SharedState {
    Arc::new(AppState::new(config, market, decisions).await)
}

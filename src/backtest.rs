//! # backtest
//!
//! **Strategy evaluation**: replays an agent's decision provider over
//! historical bars on a private scratch ledger.
//!
//! ## How it works
//! 1. Fetch history for every watchlist symbol once, sorted oldest first
//! 2. Step from `start` to `end` by the execution frequency
//! 3. At step time `t` only bars stamped `<= t` are visible (future-data mask)
//! 4. Mark the scratch ledger, ask the provider, fill at the visible close
//! 5. Track peak-to-trough drawdown of total value
//!
//! The live ledger is never touched.

use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::decision::DecisionProvider;
use crate::ledger::{Ledger, LedgerError};
use crate::market::MarketDataProvider;
use crate::models::{HistoricalBar, MarketData, MarketSnapshot, TradeAction};
use crate::scheduler::registry::AgentRegistry;

/// Upper bound on simulated steps per run.
pub const MAX_STEPS: usize = 10_000;

/// Run parameters the backtester refuses before simulating anything.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BacktestError {
    #[error("endDate {end} is before startDate {start}")]
    InvertedWindow { start: DateTime<Utc>, end: DateTime<Utc> },

    #[error("initialCapital must be positive, got {0}")]
    InvalidCapital(f64),

    #[error("backtest window needs {0} steps, limit is {MAX_STEPS}")]
    TooManySteps(usize),
}

// ─── Request ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionFrequency {
    Hourly,
    Daily,
}

impl ExecutionFrequency {
    pub fn step(&self) -> Duration {
        match self {
            ExecutionFrequency::Hourly => Duration::hours(1),
            ExecutionFrequency::Daily  => Duration::days(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BacktestConfig {
    pub agent_id:        Uuid,
    pub start:           DateTime<Utc>,
    pub end:             DateTime<Utc>,
    pub initial_capital: f64,
    pub frequency:       ExecutionFrequency,
}

// ─── Response ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestReport {
    pub agent_id:             Uuid,
    pub start_date:           DateTime<Utc>,
    pub end_date:             DateTime<Utc>,
    pub initial_capital:      f64,
    pub final_value:          f64,
    /// Percent.
    pub total_return:         f64,
    /// Largest peak-to-trough fall of total value, percent of the peak.
    pub max_drawdown_percent: f64,
    /// Steps that had data and were evaluated.
    pub steps:                usize,
    pub trades:               Vec<BacktestTrade>,
    pub rejected_orders:      usize,
    pub rejections:           RejectionBreakdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestTrade {
    pub time:     DateTime<Utc>,
    pub symbol:   String,
    pub action:   TradeAction,
    pub quantity: u64,
    pub price:    f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profit:   Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectionBreakdown {
    pub invalid_intent:        usize,
    pub no_quote:              usize,
    pub insufficient_cash:     usize,
    pub insufficient_position: usize,
}

impl RejectionBreakdown {
    fn total(&self) -> usize {
        self.invalid_intent + self.no_quote + self.insufficient_cash + self.insufficient_position
    }

    fn record(&mut self, err: &LedgerError) {
        match err {
            LedgerError::InsufficientCash { .. } => self.insufficient_cash += 1,
            LedgerError::NoPosition(_) | LedgerError::InsufficientQuantity { .. } => {
                self.insufficient_position += 1
            }
            _ => self.invalid_intent += 1,
        }
    }
}

// ─── Backtester ───────────────────────────────────────────────────────────────

pub struct Backtester {
    agents:    Arc<AgentRegistry>,
    market:    Arc<dyn MarketDataProvider>,
    decisions: Arc<dyn DecisionProvider>,
}

impl Backtester {
    pub fn new(
        agents: Arc<AgentRegistry>,
        market: Arc<dyn MarketDataProvider>,
        decisions: Arc<dyn DecisionProvider>,
    ) -> Self {
        Self { agents, market, decisions }
    }

    pub async fn run(&self, config: BacktestConfig) -> anyhow::Result<BacktestReport> {
        if config.end < config.start {
            return Err(BacktestError::InvertedWindow { start: config.start, end: config.end }.into());
        }
        if !config.initial_capital.is_finite() || config.initial_capital <= 0.0 {
            return Err(BacktestError::InvalidCapital(config.initial_capital).into());
        }

        let step = config.frequency.step();
        let planned = ((config.end - config.start).num_seconds() / step.num_seconds()) as usize + 1;
        if planned > MAX_STEPS {
            return Err(BacktestError::TooManySteps(planned).into());
        }

        let agent = self
            .agents
            .get(config.agent_id)
            .await
            .with_context(|| format!("agent {} not found", config.agent_id))?;

        // One bar before the window so the first quote has a change.
        let lookback = config.start - step;
        let mut series: Vec<(String, Vec<HistoricalBar>)> = Vec::with_capacity(agent.watchlist.len());
        for symbol in &agent.watchlist {
            let mut bars = self.market.history(symbol, lookback, config.end).await?;
            bars.sort_by_key(|b| b.timestamp);
            series.push((symbol.clone(), bars));
        }

        let ledger = Ledger::new();
        ledger.initialize_account(agent.id, config.initial_capital)?;

        let mut trades     = Vec::new();
        let mut rejections = RejectionBreakdown::default();
        let mut steps      = 0usize;
        let mut peak       = config.initial_capital;
        let mut max_dd     = 0.0_f64;

        let mut t = config.start;
        while t <= config.end {
            let snapshot = snapshot_at(&series, t);
            t += step;
            if snapshot.quotes.is_empty() {
                continue;
            }
            steps += 1;

            ledger.update_market_prices(agent.id, &snapshot.price_updates()).await;
            let portfolio = ledger.get_portfolio(agent.id).await;

            if portfolio.total_value > peak { peak = portfolio.total_value; }
            let drawdown = (peak - portfolio.total_value) / peak * 100.0;
            if drawdown > max_dd { max_dd = drawdown; }

            let decision = self
                .decisions
                .decide(&agent, &portfolio, &snapshot)
                .await
                .with_context(|| format!("decision provider failed at {}", snapshot.taken_at))?;

            let request = match decision.into_request() {
                Ok(Some(request)) => request,
                Ok(None) => continue,
                Err(e) => {
                    debug!(error = %e, at = %snapshot.taken_at, "Backtest intent rejected");
                    rejections.invalid_intent += 1;
                    continue;
                }
            };

            let Some(quote) = snapshot.quote(&request.symbol) else {
                rejections.no_quote += 1;
                continue;
            };

            match ledger.apply_trade(agent.id, &request, quote.price).await {
                Ok(trade) => trades.push(BacktestTrade {
                    time:     snapshot.taken_at,
                    symbol:   trade.symbol,
                    action:   trade.action,
                    quantity: trade.quantity,
                    price:    trade.price,
                    profit:   trade.profit,
                }),
                Err(e) => {
                    debug!(error = %e, at = %snapshot.taken_at, "Backtest order rejected");
                    rejections.record(&e);
                }
            }
        }

        let final_value  = ledger.get_portfolio(agent.id).await.total_value;
        let total_return = ledger.calculate_return(agent.id, config.initial_capital).await?;

        info!(
            agent_id     = %agent.id,
            steps,
            trades       = trades.len(),
            total_return,
            max_drawdown = max_dd,
            "🧪 Backtest complete"
        );

        Ok(BacktestReport {
            agent_id:             agent.id,
            start_date:           config.start,
            end_date:             config.end,
            initial_capital:      config.initial_capital,
            final_value,
            total_return,
            max_drawdown_percent: max_dd,
            steps,
            trades,
            rejected_orders:      rejections.total(),
            rejections,
        })
    }
}

/// Quotes as they looked at `t`: latest bar at or before `t` per symbol,
/// change measured against the bar before it.
fn snapshot_at(series: &[(String, Vec<HistoricalBar>)], t: DateTime<Utc>) -> MarketSnapshot {
    let quotes = series
        .iter()
        .filter_map(|(symbol, bars)| {
            let visible = &bars[..bars.partition_point(|b| b.timestamp <= t)];
            let last = visible.last()?;
            let prev_close = visible
                .len()
                .checked_sub(2)
                .map(|i| visible[i].close)
                .unwrap_or(last.close);
            let change = last.close - prev_close;

            Some(MarketData {
                symbol:         symbol.clone(),
                price:          last.close,
                change,
                change_percent: if prev_close > 0.0 { change / prev_close * 100.0 } else { 0.0 },
                volume:         last.volume,
                timestamp:      last.timestamp,
            })
        })
        .collect();

    MarketSnapshot { quotes, taken_at: t }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::{Decision, ScriptedProvider};
    use crate::market::SimulatedMarket;
    use crate::models::{Agent, NewAgent, PortfolioSnapshot};
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    fn t0() -> DateTime<Utc> {
        "2024-01-01T00:00:00Z".parse().unwrap()
    }

    fn daily_bars(closes: &[f64]) -> Vec<HistoricalBar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| HistoricalBar {
                timestamp: t0() + Duration::days(i as i64),
                open: c, high: c, low: c, close: c, volume: 1_000.0,
            })
            .collect()
    }

    async fn agent_with(watchlist: &[&str]) -> (Arc<AgentRegistry>, Agent) {
        let agents = Arc::new(AgentRegistry::new());
        let req = NewAgent {
            watchlist: Some(watchlist.iter().map(|s| s.to_string()).collect()),
            ..Default::default()
        };
        let agent = Agent::from_request(req, &[], 10_000.0);
        agents.insert(agent.clone()).await;
        (agents, agent)
    }

    fn config(agent_id: Uuid, days: i64) -> BacktestConfig {
        BacktestConfig {
            agent_id,
            start:           t0(),
            end:             t0() + Duration::days(days),
            initial_capital: 10_000.0,
            frequency:       ExecutionFrequency::Daily,
        }
    }

    /// Records the newest quote timestamp it was shown.
    #[derive(Default)]
    struct Peeker {
        seen: Mutex<Vec<(DateTime<Utc>, DateTime<Utc>)>>,
    }

    #[async_trait]
    impl DecisionProvider for Peeker {
        async fn decide(
            &self,
            _agent: &Agent,
            _portfolio: &PortfolioSnapshot,
            market: &MarketSnapshot,
        ) -> anyhow::Result<Decision> {
            let newest = market.quotes.iter().map(|q| q.timestamp).max().unwrap();
            self.seen.lock().await.push((market.taken_at, newest));
            Ok(Decision::hold())
        }
    }

    #[tokio::test]
    async fn test_backtest_never_sees_future_bars() {
        let market = Arc::new(SimulatedMarket::new());
        market.load_history("AAPL", daily_bars(&[100.0, 101.0, 102.0, 103.0, 104.0])).await;
        let (agents, agent) = agent_with(&["AAPL"]).await;
        let peeker = Arc::new(Peeker::default());

        let report = Backtester::new(agents, market, peeker.clone())
            .run(config(agent.id, 4))
            .await
            .unwrap();

        assert_eq!(report.steps, 5);
        let seen = peeker.seen.lock().await;
        assert_eq!(seen.len(), 5);
        assert!(seen.iter().all(|(at, newest)| newest <= at));
    }

    #[tokio::test]
    async fn test_backtest_tracks_return_and_drawdown() {
        let market = Arc::new(SimulatedMarket::new());
        market.load_history("AAPL", daily_bars(&[100.0, 120.0, 90.0, 110.0])).await;
        let (agents, agent) = agent_with(&["AAPL"]).await;

        let provider = Arc::new(ScriptedProvider::new());
        provider
            .extend(agent.id, [Decision::buy("AAPL", 50), Decision::hold(), Decision::hold(), Decision::sell("AAPL", 50)])
            .await;

        let report = Backtester::new(agents, market, provider)
            .run(config(agent.id, 3))
            .await
            .unwrap();

        // Buy 50 @ 100, sell 50 @ 110.
        assert_eq!(report.trades.len(), 2);
        assert_eq!(report.trades[1].profit, Some(500.0));
        assert_eq!(report.final_value, 10_500.0);
        assert!((report.total_return - 5.0).abs() < 1e-9);

        // Peak 11_000 (day 1) to trough 9_500 (day 2).
        let expected = (11_000.0 - 9_500.0) / 11_000.0 * 100.0;
        assert!((report.max_drawdown_percent - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_backtest_counts_rejected_orders() {
        let market = Arc::new(SimulatedMarket::new());
        market.load_history("AAPL", daily_bars(&[100.0, 100.0, 100.0])).await;
        let (agents, agent) = agent_with(&["AAPL"]).await;

        let provider = Arc::new(ScriptedProvider::new());
        provider
            .extend(agent.id, [Decision::buy("AAPL", 1_000), Decision::sell("AAPL", 1), Decision::buy("TSLA", 1)])
            .await;

        let report = Backtester::new(agents, market, provider)
            .run(config(agent.id, 2))
            .await
            .unwrap();

        assert!(report.trades.is_empty());
        assert_eq!(report.rejected_orders, 3);
        assert_eq!(report.rejections.insufficient_cash, 1);
        assert_eq!(report.rejections.insufficient_position, 1);
        assert_eq!(report.rejections.no_quote, 1);
        assert_eq!(report.final_value, 10_000.0);
    }

    #[tokio::test]
    async fn test_backtest_rejects_inverted_window() {
        let market = Arc::new(SimulatedMarket::new());
        let (agents, agent) = agent_with(&["AAPL"]).await;
        let mut cfg = config(agent.id, 1);
        std::mem::swap(&mut cfg.start, &mut cfg.end);

        let provider = Arc::new(ScriptedProvider::new());
        let err = Backtester::new(agents, market, provider).run(cfg).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<BacktestError>(), Some(BacktestError::InvertedWindow { .. })));
    }
}

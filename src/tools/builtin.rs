//! # tools::builtin
//!
//! The standard tool set every agent gets:
//!
//! | Tool                  | Side effects                  |
//! |-----------------------|-------------------------------|
//! | `get_market_data`     | none                          |
//! | `place_order`         | fills on the Ledger, records the trade on the agent |
//! | `get_portfolio`       | none                          |
//! | `get_historical_data` | none (future bars masked)     |
//! | `evaluate_strategy`   | none (scratch ledger)         |
//!
//! `place_order` is the only write path into the live Ledger. Fills for one
//! agent are serialized so its trade history replays in ledger order.

use std::sync::Arc;

use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::backtest::{BacktestConfig, Backtester, ExecutionFrequency};
use crate::ledger::Ledger;
use crate::market::{mask_future, MarketDataProvider};
use crate::models::{PriceUpdate, Timeframe, TradeAction, TradeRequest, INITIAL_CAPITAL};
use crate::scheduler::registry::AgentRegistry;
use crate::tools::{
    opt_f64_param, opt_str_param, str_param, u64_param, ParamSchema, ParamType, Params,
    ToolDefinition, ToolHandler, ToolRegistry,
};

pub const GET_MARKET_DATA: &str = "get_market_data";
pub const PLACE_ORDER: &str = "place_order";
pub const GET_PORTFOLIO: &str = "get_portfolio";
pub const GET_HISTORICAL_DATA: &str = "get_historical_data";
pub const EVALUATE_STRATEGY: &str = "evaluate_strategy";

/// Install the five standard tools.
pub async fn register_builtin_tools(
    registry: &ToolRegistry,
    agents: Arc<AgentRegistry>,
    ledger: Arc<Ledger>,
    market: Arc<dyn MarketDataProvider>,
    backtester: Arc<Backtester>,
) {
    registry
        .register(market_data_definition(), Arc::new(MarketDataTool { market: Arc::clone(&market) }))
        .await;
    registry
        .register(
            place_order_definition(),
            Arc::new(PlaceOrderTool {
                agents,
                market: Arc::clone(&market),
                ledger: Arc::clone(&ledger),
                fills:  DashMap::new(),
            }),
        )
        .await;
    registry
        .register(portfolio_definition(), Arc::new(PortfolioTool { ledger }))
        .await;
    registry
        .register(historical_data_definition(), Arc::new(HistoricalDataTool { market }))
        .await;
    registry
        .register(evaluate_strategy_definition(), Arc::new(EvaluateStrategyTool { backtester }))
        .await;
}

// ─── Definitions ──────────────────────────────────────────────────────────────

pub fn market_data_definition() -> ToolDefinition {
    ToolDefinition::new(GET_MARKET_DATA, "Fetch real-time market data for a given symbol")
        .param("symbol", ParamSchema::required(ParamType::String))
        .param(
            "timeframe",
            ParamSchema::optional(ParamType::String).one_of(&Timeframe::ALL).with_default("1h"),
        )
}

pub fn place_order_definition() -> ToolDefinition {
    ToolDefinition::new(PLACE_ORDER, "Place a buy or sell order for a stock")
        .param("agentId", ParamSchema::required(ParamType::String))
        .param("symbol", ParamSchema::required(ParamType::String))
        .param("action", ParamSchema::required(ParamType::String).one_of(&["buy", "sell"]))
        .param("quantity", ParamSchema::required(ParamType::Integer))
        .param(
            "orderType",
            ParamSchema::optional(ParamType::String).one_of(&["market", "limit"]).with_default("market"),
        )
        .param("limitPrice", ParamSchema::optional(ParamType::Number))
        .param("reasoning", ParamSchema::optional(ParamType::String))
}

pub fn portfolio_definition() -> ToolDefinition {
    ToolDefinition::new(GET_PORTFOLIO, "Get current portfolio positions and cash balance")
        .param("agentId", ParamSchema::required(ParamType::String))
}

pub fn historical_data_definition() -> ToolDefinition {
    ToolDefinition::new(
        GET_HISTORICAL_DATA,
        "Fetch historical market data with automatic future data blocking",
    )
    .param("symbol", ParamSchema::required(ParamType::String))
    .param("startDate", ParamSchema::required(ParamType::String))
    .param("endDate", ParamSchema::required(ParamType::String))
    .param("currentTime", ParamSchema::required(ParamType::String))
}

pub fn evaluate_strategy_definition() -> ToolDefinition {
    ToolDefinition::new(EVALUATE_STRATEGY, "Backtest a strategy on historical data")
        .param("agentId", ParamSchema::required(ParamType::String))
        .param("startDate", ParamSchema::required(ParamType::String))
        .param("endDate", ParamSchema::required(ParamType::String))
        .param("initialCapital", ParamSchema::optional(ParamType::Number).with_default(INITIAL_CAPITAL))
        .param(
            "executionFrequency",
            ParamSchema::optional(ParamType::String).one_of(&["hourly", "daily"]).with_default("daily"),
        )
}

// ─── get_market_data ──────────────────────────────────────────────────────────

struct MarketDataTool {
    market: Arc<dyn MarketDataProvider>,
}

#[async_trait]
impl ToolHandler for MarketDataTool {
    async fn call(&self, params: Params) -> anyhow::Result<Value> {
        let symbol = str_param(&params, "symbol")?;
        let timeframe: Timeframe = str_param(&params, "timeframe")?
            .parse()
            .map_err(anyhow::Error::msg)?;

        let quote = self.market.quote(symbol, timeframe).await?;
        Ok(serde_json::to_value(quote)?)
    }
}

// ─── place_order ──────────────────────────────────────────────────────────────

struct PlaceOrderTool {
    agents: Arc<AgentRegistry>,
    market: Arc<dyn MarketDataProvider>,
    ledger: Arc<Ledger>,
    /// Per-agent fill lock, held from ledger apply to history append.
    fills:  DashMap<Uuid, Arc<Mutex<()>>>,
}

#[async_trait]
impl ToolHandler for PlaceOrderTool {
    async fn call(&self, params: Params) -> anyhow::Result<Value> {
        let agent_id = agent_id_param(&params)?;
        let symbol = str_param(&params, "symbol")?.trim().to_string();
        let action: TradeAction = str_param(&params, "action")?.parse().map_err(anyhow::Error::msg)?;
        let quantity = u64_param(&params, "quantity")?;
        let order_type = str_param(&params, "orderType")?;

        let Some(agent) = self.agents.get(agent_id).await else {
            self.fills.remove(&agent_id);
            bail!("agent {agent_id} is not registered");
        };

        let quote = self.market.quote(&symbol, Timeframe::OneMinute).await?;
        let fill_price = quote.price;

        if order_type == "limit" {
            let limit = opt_f64_param(&params, "limitPrice").context("limit orders require limitPrice")?;
            let marketable = match action {
                TradeAction::Buy  => fill_price <= limit,
                TradeAction::Sell => fill_price >= limit,
            };
            if !marketable {
                bail!("limit {action} {symbol} @ {limit} not marketable at {fill_price}");
            }
        }

        let request = TradeRequest {
            symbol:    symbol.clone(),
            action,
            quantity,
            reasoning: opt_str_param(&params, "reasoning").map(str::to_string),
        };

        let gate = Arc::clone(self.fills.entry(agent_id).or_default().value());
        let _fill = gate.lock().await;

        let trade = self.ledger.apply_trade(agent_id, &request, fill_price).await?;
        self.ledger
            .update_market_prices(agent_id, &[PriceUpdate::new(symbol, fill_price)])
            .await;

        let total_return = if agent.capital != 0.0 {
            self.ledger.calculate_return(agent_id, agent.capital).await?
        } else {
            0.0
        };
        if !self.agents.append_trade(agent_id, trade.clone(), total_return).await {
            warn!(agent_id = %agent_id, trade_id = %trade.id, "Agent removed mid-order, trade not recorded");
        }

        info!(
            agent_id = %agent_id,
            trade_id = %trade.id,
            symbol   = %trade.symbol,
            action   = %trade.action,
            quantity = trade.quantity,
            price    = trade.price,
            "📈 Order filled"
        );

        Ok(json!({
            "orderId":     trade.id,
            "status":      "filled",
            "orderType":   order_type,
            "trade":       trade,
            "totalReturn": total_return,
        }))
    }
}

// ─── get_portfolio ────────────────────────────────────────────────────────────

struct PortfolioTool {
    ledger: Arc<Ledger>,
}

#[async_trait]
impl ToolHandler for PortfolioTool {
    async fn call(&self, params: Params) -> anyhow::Result<Value> {
        let agent_id = agent_id_param(&params)?;
        let portfolio = self.ledger.get_portfolio(agent_id).await;
        Ok(serde_json::to_value(portfolio)?)
    }
}

// ─── get_historical_data ──────────────────────────────────────────────────────

struct HistoricalDataTool {
    market: Arc<dyn MarketDataProvider>,
}

#[async_trait]
impl ToolHandler for HistoricalDataTool {
    async fn call(&self, params: Params) -> anyhow::Result<Value> {
        let symbol = str_param(&params, "symbol")?;
        let start = time_param(&params, "startDate")?;
        let end = time_param(&params, "endDate")?;
        let current_time = time_param(&params, "currentTime")?;

        if end < start {
            bail!("endDate {end} is before startDate {start}");
        }

        let bars = self.market.history(symbol, start, end).await?;
        let fetched = bars.len();
        let data = mask_future(bars, current_time);

        Ok(json!({
            "symbol":   symbol,
            "data":     data,
            "maskedAt": current_time,
            "withheld": fetched - data.len(),
        }))
    }
}

// ─── evaluate_strategy ────────────────────────────────────────────────────────

struct EvaluateStrategyTool {
    backtester: Arc<Backtester>,
}

#[async_trait]
impl ToolHandler for EvaluateStrategyTool {
    async fn call(&self, params: Params) -> anyhow::Result<Value> {
        let frequency = match str_param(&params, "executionFrequency")? {
            "hourly" => ExecutionFrequency::Hourly,
            _ => ExecutionFrequency::Daily,
        };

        let config = BacktestConfig {
            agent_id:        agent_id_param(&params)?,
            start:           time_param(&params, "startDate")?,
            end:             time_param(&params, "endDate")?,
            initial_capital: opt_f64_param(&params, "initialCapital").unwrap_or(INITIAL_CAPITAL),
            frequency,
        };

        let report = self.backtester.run(config).await?;
        Ok(serde_json::to_value(report)?)
    }
}

// ─── Parsing ──────────────────────────────────────────────────────────────────

fn agent_id_param(params: &Params) -> anyhow::Result<Uuid> {
    let raw = str_param(params, "agentId")?;
    Uuid::parse_str(raw).with_context(|| format!("agentId '{raw}' is not a valid id"))
}

/// RFC 3339 timestamp, or a bare `YYYY-MM-DD` date meaning midnight UTC.
pub(crate) fn parse_time(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("'{raw}' is neither RFC 3339 nor YYYY-MM-DD"))?;
    date.and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
        .with_context(|| format!("'{raw}' has no midnight"))
}

fn time_param(params: &Params, key: &str) -> anyhow::Result<DateTime<Utc>> {
    parse_time(str_param(params, key)?).with_context(|| format!("parameter '{key}'"))
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::HoldProvider;
    use crate::ledger::LedgerError;
    use crate::market::SimulatedMarket;
    use crate::models::{Agent, HistoricalBar, NewAgent};
    use crate::tools::ToolError;
    use chrono::Duration;

    struct Fixture {
        tools:  ToolRegistry,
        agents: Arc<AgentRegistry>,
        ledger: Arc<Ledger>,
        market: Arc<SimulatedMarket>,
    }

    impl Fixture {
        /// Registered agent with an open account.
        async fn agent(&self, capital: f64) -> Uuid {
            let agent = Agent::from_request(NewAgent::default(), &["AAPL".to_string()], capital);
            self.ledger.initialize_account(agent.id, capital).unwrap();
            self.agents.insert(agent.clone()).await;
            agent.id
        }
    }

    async fn fixture() -> Fixture {
        let agents = Arc::new(AgentRegistry::new());
        let ledger = Arc::new(Ledger::new());
        let market = Arc::new(SimulatedMarket::new());
        let backtester = Arc::new(Backtester::new(agents.clone(), market.clone(), Arc::new(HoldProvider)));
        let tools = ToolRegistry::new();
        register_builtin_tools(&tools, agents.clone(), ledger.clone(), market.clone(), backtester).await;
        Fixture { tools, agents, ledger, market }
    }

    fn order(id: Uuid, action: &str, quantity: u64) -> Value {
        json!({ "agentId": id.to_string(), "symbol": "AAPL", "action": action, "quantity": quantity })
    }

    fn hourly_bars(start: DateTime<Utc>, closes: &[f64]) -> Vec<HistoricalBar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| HistoricalBar {
                timestamp: start + Duration::hours(i as i64),
                open: c, high: c, low: c, close: c, volume: 100.0,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_builtin_tool_names() {
        let f = fixture().await;
        let names: Vec<String> = f.tools.list_tools().await.into_iter().map(|t| t.name).collect();
        assert_eq!(
            names,
            vec![EVALUATE_STRATEGY, GET_HISTORICAL_DATA, GET_MARKET_DATA, GET_PORTFOLIO, PLACE_ORDER]
        );
    }

    #[tokio::test]
    async fn test_place_order_fills_at_market() {
        let f = fixture().await;
        let id = f.agent(10_000.0).await;
        f.market.set_price("AAPL", 150.0).await;

        let out = f.tools.invoke(PLACE_ORDER, order(id, "buy", 10)).await.unwrap();

        assert_eq!(out["status"], "filled");
        assert_eq!(out["orderType"], "market");
        assert_eq!(out["trade"]["price"], 150.0);
        assert_eq!(out["totalReturn"], 0.0);
        assert_eq!(f.ledger.get_portfolio(id).await.cash, 8_500.0);
    }

    #[tokio::test]
    async fn test_direct_orders_land_in_agent_history() {
        let f = fixture().await;
        let id = f.agent(10_000.0).await;
        f.market.set_price("AAPL", 150.0).await;
        f.tools.invoke(PLACE_ORDER, order(id, "buy", 10)).await.unwrap();

        f.market.set_price("AAPL", 160.0).await;
        let out = f.tools.invoke(PLACE_ORDER, order(id, "sell", 4)).await.unwrap();
        assert_eq!(out["trade"]["profit"], 40.0);

        let agent = f.agents.get(id).await.unwrap();
        assert_eq!(agent.trades.len(), 2);
        assert!((agent.total_return - 1.0).abs() < 1e-9);

        let replay = Ledger::new();
        replay.restore_account(id, agent.capital, &agent.trades).unwrap();
        let live = f.ledger.get_portfolio(id).await;
        let rebuilt = replay.get_portfolio(id).await;
        assert_eq!(live.cash, rebuilt.cash);
        assert_eq!(live.positions, rebuilt.positions);
    }

    #[tokio::test]
    async fn test_place_order_refuses_unregistered_agent() {
        let f = fixture().await;
        let id = Uuid::new_v4();
        f.ledger.initialize_account(id, 10_000.0).unwrap();
        f.market.set_price("AAPL", 150.0).await;

        let err = f.tools.invoke(PLACE_ORDER, order(id, "buy", 1)).await.unwrap_err();
        assert!(matches!(err, ToolError::Handler { .. }));
        assert_eq!(f.ledger.get_portfolio(id).await.cash, 10_000.0);
    }

    #[tokio::test]
    async fn test_place_order_surfaces_ledger_rejection() {
        let f = fixture().await;
        let id = f.agent(100.0).await;
        f.market.set_price("AAPL", 150.0).await;

        let err = f.tools.invoke(PLACE_ORDER, order(id, "buy", 1)).await.unwrap_err();

        assert!(matches!(
            err.handler_cause::<LedgerError>(),
            Some(LedgerError::InsufficientCash { .. })
        ));
        assert_eq!(f.ledger.get_portfolio(id).await.cash, 100.0);
        assert!(f.agents.get(id).await.unwrap().trades.is_empty());
    }

    #[tokio::test]
    async fn test_place_order_validates_action_enum() {
        let f = fixture().await;
        let err = f
            .tools
            .invoke(PLACE_ORDER, json!({ "agentId": Uuid::new_v4().to_string(), "symbol": "AAPL", "action": "short", "quantity": 1 }))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidEnumValue { ref key, .. } if key == "action"));
    }

    #[tokio::test]
    async fn test_limit_order_needs_marketable_price() {
        let f = fixture().await;
        let id = f.agent(10_000.0).await;
        f.market.set_price("AAPL", 150.0).await;

        let mut base = order(id, "buy", 1);
        base["orderType"] = json!("limit");

        let mut missing = base.clone();
        missing["limitPrice"] = Value::Null;
        assert!(f.tools.invoke(PLACE_ORDER, missing).await.is_err());

        let mut too_low = base.clone();
        too_low["limitPrice"] = json!(140.0);
        assert!(f.tools.invoke(PLACE_ORDER, too_low).await.is_err());
        assert_eq!(f.ledger.get_portfolio(id).await.cash, 10_000.0);

        let mut ok = base;
        ok["limitPrice"] = json!(155.0);
        f.tools.invoke(PLACE_ORDER, ok).await.unwrap();
        assert_eq!(f.ledger.get_portfolio(id).await.cash, 9_850.0);
    }

    #[tokio::test]
    async fn test_get_portfolio_of_unknown_agent_is_zeroed() {
        let f = fixture().await;
        let out = f
            .tools
            .invoke(GET_PORTFOLIO, json!({ "agentId": Uuid::new_v4().to_string() }))
            .await
            .unwrap();
        assert_eq!(out["cash"], 0.0);
        assert_eq!(out["totalValue"], 0.0);
        assert_eq!(out["positions"], json!([]));
    }

    #[tokio::test]
    async fn test_market_data_defaults_timeframe() {
        let f = fixture().await;
        f.market.set_price("MSFT", 410.0).await;
        let out = f.tools.invoke(GET_MARKET_DATA, json!({ "symbol": "MSFT" })).await.unwrap();
        assert_eq!(out["symbol"], "MSFT");
        assert_eq!(out["price"], 410.0);
    }

    #[tokio::test]
    async fn test_historical_data_never_leaks_future_bars() {
        let f = fixture().await;
        let t0 = "2024-03-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        f.market.load_history("AAPL", hourly_bars(t0, &[1.0, 2.0, 3.0, 4.0, 5.0])).await;

        let call = |current: DateTime<Utc>| {
            json!({
                "symbol":      "AAPL",
                "startDate":   "2024-02-01",
                "endDate":     "2024-04-01T00:00:00Z",
                "currentTime": current.to_rfc3339(),
            })
        };

        // Before the first bar: nothing.
        let out = f.tools.invoke(GET_HISTORICAL_DATA, call(t0 - Duration::minutes(1))).await.unwrap();
        assert_eq!(out["data"], json!([]));
        assert_eq!(out["withheld"], 5);

        // Mid-series: the bar stamped exactly at currentTime is visible, later ones are not.
        let current = t0 + Duration::hours(2);
        let out = f.tools.invoke(GET_HISTORICAL_DATA, call(current)).await.unwrap();
        let data: Vec<HistoricalBar> = serde_json::from_value(out["data"].clone()).unwrap();
        assert_eq!(data.len(), 3);
        assert!(data.iter().all(|b| b.timestamp <= current));

        // After the last bar: everything.
        let out = f.tools.invoke(GET_HISTORICAL_DATA, call(t0 + Duration::days(2))).await.unwrap();
        assert_eq!(out["data"].as_array().unwrap().len(), 5);
        assert_eq!(out["withheld"], 0);
    }

    #[tokio::test]
    async fn test_historical_data_rejects_bad_dates() {
        let f = fixture().await;
        f.market.load_history("AAPL", Vec::new()).await;
        let err = f
            .tools
            .invoke(
                GET_HISTORICAL_DATA,
                json!({ "symbol": "AAPL", "startDate": "yesterday", "endDate": "2024-01-01", "currentTime": "2024-01-01" }),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Handler { .. }));
    }

    #[test]
    fn test_parse_time_accepts_dates_and_rfc3339() {
        let a = parse_time("2024-05-01").unwrap();
        let b = parse_time("2024-05-01T00:00:00+00:00").unwrap();
        assert_eq!(a, b);
        assert!(parse_time("05/01/2024").is_err());
    }
}

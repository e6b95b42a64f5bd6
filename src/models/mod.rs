//! Domain models shared across the entire ZenAI system.

pub mod agent;
pub mod market;
pub mod portfolio;
pub mod trade;

pub use agent::{Agent, AgentUpdate, ModelType, NewAgent};
pub use market::{HistoricalBar, MarketData, MarketSnapshot, PriceUpdate, Timeframe};
pub use portfolio::{PortfolioSnapshot, Position};
pub use trade::{Trade, TradeAction, TradeRequest};

/// Symbols the simulated market carries out of the box.
pub const NASDAQ_100_SYMBOLS: &[&str] = &[
    "AAPL", "MSFT", "GOOGL", "AMZN", "NVDA", "META", "TSLA", "AVGO", "COST", "NFLX",
    "AMD", "PEP", "ADBE", "CSCO", "CMCSA", "TMUS", "INTC", "TXN", "QCOM", "AMGN",
];

/// Capital every new agent receives unless configured otherwise.
pub const INITIAL_CAPITAL: f64 = 10_000.0;

/// Hours between two scheduled ticks of a running agent.
pub const EXECUTION_FREQUENCY_HOURS: u64 = 1;

//! # ZenAI: autonomous trading agent core
//!
//! ```text
//!  ┌───────────┐  start/stop   ┌──────────────┐  every tick   ┌─────────────┐
//!  │  HTTP API │ ────────────▶ │  Scheduler   │ ────────────▶ │ TickRunner  │
//!  └───────────┘               │ PeriodicTask │               └──────┬──────┘
//!        │ /api/tools/:name    └──────────────┘                      │
//!        ▼                                                           ▼
//!  ┌──────────────────────────────────────────────┐      ┌────────────────────┐
//!  │ ToolRegistry                                 │ ◀─── │ DecisionProvider   │
//!  │  get_market_data · place_order · portfolio   │      └────────────────────┘
//!  │  get_historical_data · evaluate_strategy     │
//!  └───────┬──────────────────────┬───────────────┘
//!          ▼                      ▼
//!   MarketDataProvider        Ledger (per-agent cash + positions)
//! ```

pub mod backtest;
pub mod config;
pub mod decision;
pub mod error;
pub mod events;
pub mod ledger;
pub mod market;
pub mod models;
pub mod routes;
pub mod scheduler;
pub mod state;
pub mod tools;

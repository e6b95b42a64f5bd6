//! # config
//!
//! Settings read from environment variables (after `.env` is loaded).
//!
//! | Variable             | Default        |
//! |----------------------|----------------|
//! | `BIND_ADDR`          | `0.0.0.0:3000` |
//! | `TICK_INTERVAL_SECS` | `3600`         |
//! | `INITIAL_CAPITAL`    | `10000`        |
//! | `WATCHLIST`          | `AAPL`         |
//! | `EVENT_BUFFER`       | `256`          |
//! | `HISTORY_DAYS`       | `30` (0..=3650) |

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context};

use crate::market::MAX_HISTORY_DAYS;
use crate::models::{EXECUTION_FREQUENCY_HOURS, INITIAL_CAPITAL};

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr:       SocketAddr,
    /// Period between scheduled ticks of a running agent.
    pub tick_interval:   Duration,
    /// Capital for agents created without one.
    pub initial_capital: f64,
    /// Watchlist for agents created without one.
    pub watchlist:       Vec<String>,
    /// Capacity of the event broadcast channel.
    pub event_buffer:    usize,
    /// Depth of the simulated market's synthesized history.
    pub history_days:    i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr:       SocketAddr::from(([0, 0, 0, 0], 3000)),
            tick_interval:   Duration::from_secs(EXECUTION_FREQUENCY_HOURS * 3600),
            initial_capital: INITIAL_CAPITAL,
            watchlist:       vec!["AAPL".to_string()],
            event_buffer:    256,
            history_days:    30,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys take the defaults.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let bind_addr = match lookup("BIND_ADDR") {
            Some(raw) => raw.parse::<SocketAddr>().with_context(|| format!("BIND_ADDR '{raw}' is not host:port"))?,
            None => defaults.bind_addr,
        };

        let tick_interval = match lookup("TICK_INTERVAL_SECS") {
            Some(raw) => {
                let secs: u64 = raw.parse().context("TICK_INTERVAL_SECS must be a number")?;
                if secs == 0 {
                    bail!("TICK_INTERVAL_SECS must be greater than zero");
                }
                Duration::from_secs(secs)
            }
            None => defaults.tick_interval,
        };

        let initial_capital = match lookup("INITIAL_CAPITAL") {
            Some(raw) => {
                let capital: f64 = raw.parse().context("INITIAL_CAPITAL must be a number")?;
                if !capital.is_finite() || capital < 0.0 {
                    bail!("INITIAL_CAPITAL must be a non-negative amount, got {capital}");
                }
                capital
            }
            None => defaults.initial_capital,
        };

        let watchlist = match lookup("WATCHLIST") {
            Some(raw) => {
                let symbols: Vec<String> = raw
                    .split(',')
                    .map(|s| s.trim().to_uppercase())
                    .filter(|s| !s.is_empty())
                    .collect();
                if symbols.is_empty() {
                    bail!("WATCHLIST must name at least one symbol");
                }
                symbols
            }
            None => defaults.watchlist,
        };

        let event_buffer = match lookup("EVENT_BUFFER") {
            Some(raw) => {
                let size: usize = raw.parse().context("EVENT_BUFFER must be a number")?;
                size.max(1)
            }
            None => defaults.event_buffer,
        };

        let history_days = match lookup("HISTORY_DAYS") {
            Some(raw) => {
                let days = raw.parse::<i64>().context("HISTORY_DAYS must be a number")?;
                if !(0..=MAX_HISTORY_DAYS).contains(&days) {
                    bail!("HISTORY_DAYS must be between 0 and {MAX_HISTORY_DAYS}, got {days}");
                }
                days
            }
            None => defaults.history_days,
        };

        Ok(Self { bind_addr, tick_interval, initial_capital, watchlist, event_buffer, history_days })
    }
}

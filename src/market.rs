//! # market
//!
//! The core never talks to a real feed: quotes and history come from a
//! [`MarketDataProvider`]. [`SimulatedMarket`] is the in-memory stand-in used
//! by the server binary and by tests.
//!
//! ## Simulated data
//! Hourly bars are synthesized deterministically per symbol (a slow drift plus
//! a daily wave) so runs and backtests are reproducible without a network.
//! Tests load their own bars with [`SimulatedMarket::load_history`] and pin
//! prices with [`SimulatedMarket::set_price`].

use std::collections::HashMap;

use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::models::{HistoricalBar, MarketData, Timeframe};

// ─── Provider Trait ───────────────────────────────────────────────────────────

#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Latest quote for `symbol`, with change measured over `timeframe`.
    async fn quote(&self, symbol: &str, timeframe: Timeframe) -> anyhow::Result<MarketData>;

    /// Bars with `start <= timestamp <= end`, oldest first. Implementations are
    /// not trusted to hide future bars; callers apply the mask themselves.
    async fn history(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<HistoricalBar>>;
}

/// Drop every bar stamped strictly after `current_time`.
///
/// Backtests and the historical-data tool both go through this so a strategy
/// can never see a price from its own future.
pub fn mask_future(bars: Vec<HistoricalBar>, current_time: DateTime<Utc>) -> Vec<HistoricalBar> {
    bars.into_iter().filter(|b| b.timestamp <= current_time).collect()
}

// ─── SimulatedMarket ──────────────────────────────────────────────────────────

/// Deepest synthesized history, ten years of hourly bars.
pub const MAX_HISTORY_DAYS: i64 = 3650;

#[derive(Debug, Default)]
struct SymbolBook {
    /// Sorted by timestamp.
    bars:       Vec<HistoricalBar>,
    /// Pinned live price, overrides the last bar's close.
    live_price: Option<(f64, DateTime<Utc>)>,
}

#[derive(Default)]
pub struct SimulatedMarket {
    books: RwLock<HashMap<String, SymbolBook>>,
}

impl SimulatedMarket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Market pre-loaded with `days` of hourly bars for each symbol, ending at
    /// the current hour. `days` is clamped to `0..=MAX_HISTORY_DAYS`.
    pub fn seeded(symbols: &[&str], days: i64) -> Self {
        let hours = days.clamp(0, MAX_HISTORY_DAYS) * 24;
        let now = Utc::now();
        let end = DateTime::<Utc>::from_timestamp(now.timestamp() - now.timestamp().rem_euclid(3600), 0)
            .unwrap_or(now);

        let books = symbols
            .iter()
            .enumerate()
            .map(|(i, symbol)| {
                let base = 50.0 + 37.0 * (i as f64 + 1.0);
                let book = SymbolBook {
                    bars:       synthesize_bars(base, i as f64, end, hours),
                    live_price: None,
                };
                (symbol.to_string(), book)
            })
            .collect();

        Self { books: RwLock::new(books) }
    }

    /// Replace the stored history of `symbol`.
    pub async fn load_history(&self, symbol: &str, mut bars: Vec<HistoricalBar>) {
        bars.sort_by_key(|b| b.timestamp);
        let mut books = self.books.write().await;
        books.entry(symbol.to_string()).or_default().bars = bars;
    }

    /// Pin the live price of `symbol` (creates the symbol if needed).
    pub async fn set_price(&self, symbol: &str, price: f64) {
        let mut books = self.books.write().await;
        books.entry(symbol.to_string()).or_default().live_price = Some((price, Utc::now()));
    }

    pub async fn symbols(&self) -> Vec<String> {
        let books = self.books.read().await;
        let mut symbols: Vec<String> = books.keys().cloned().collect();
        symbols.sort();
        symbols
    }
}

#[async_trait]
impl MarketDataProvider for SimulatedMarket {
    async fn quote(&self, symbol: &str, timeframe: Timeframe) -> anyhow::Result<MarketData> {
        let books = self.books.read().await;
        let book = books
            .get(symbol)
            .with_context(|| format!("unknown symbol '{symbol}'"))?;

        let (price, timestamp, volume) = match (book.live_price, book.bars.last()) {
            (Some((price, at)), last) => (price, at, last.map(|b| b.volume).unwrap_or(0.0)),
            (None, Some(last)) => (last.close, last.timestamp, last.volume),
            (None, None) => bail!("no price available for '{symbol}'"),
        };

        // Reference = last bar at or before one timeframe ago.
        let cutoff = timestamp - timeframe.duration();
        let reference = book
            .bars
            .iter()
            .rev()
            .find(|b| b.timestamp <= cutoff)
            .map(|b| b.close)
            .unwrap_or(price);

        let change = price - reference;
        let change_percent = if reference > 0.0 { change / reference * 100.0 } else { 0.0 };

        debug!(symbol, price, timeframe = timeframe.as_str(), "Quote served");

        Ok(MarketData {
            symbol: symbol.to_string(),
            price,
            change,
            change_percent,
            volume,
            timestamp,
        })
    }

    async fn history(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<HistoricalBar>> {
        let books = self.books.read().await;
        let book = books
            .get(symbol)
            .with_context(|| format!("unknown symbol '{symbol}'"))?;

        Ok(book
            .bars
            .iter()
            .filter(|b| b.timestamp >= start && b.timestamp <= end)
            .cloned()
            .collect())
    }
}

/// `count` hourly bars ending at `end`.
fn synthesize_bars(base: f64, phase: f64, end: DateTime<Utc>, count: i64) -> Vec<HistoricalBar> {
    let mut bars = Vec::with_capacity(count.max(0) as usize);
    let mut prev_close = base;

    for step in 0..count {
        let timestamp = end - Duration::hours(count - 1 - step);
        let t = step as f64;
        let drift = 1.0 + 0.0004 * t;
        let wave = 0.015 * ((t / 24.0) * std::f64::consts::TAU + phase).sin();
        let close = base * drift * (1.0 + wave);
        let open = prev_close;

        bars.push(HistoricalBar {
            timestamp,
            open,
            high:   open.max(close) * 1.002,
            low:    open.min(close) * 0.998,
            close,
            volume: 10_000.0 + 2_500.0 * (1.0 + (t + phase).cos()),
        });
        prev_close = close;
    }
    bars
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(ts: DateTime<Utc>, close: f64) -> HistoricalBar {
        HistoricalBar { timestamp: ts, open: close, high: close, low: close, close, volume: 1.0 }
    }

    #[test]
    fn test_mask_future_keeps_boundary_bar() {
        let t0 = Utc::now();
        let bars = vec![bar(t0, 1.0), bar(t0 + Duration::hours(1), 2.0), bar(t0 + Duration::hours(2), 3.0)];

        let masked = mask_future(bars.clone(), t0 + Duration::hours(1));
        assert_eq!(masked.len(), 2);
        assert!(masked.iter().all(|b| b.timestamp <= t0 + Duration::hours(1)));

        assert!(mask_future(bars.clone(), t0 - Duration::seconds(1)).is_empty());
        assert_eq!(mask_future(bars, t0 + Duration::days(1)).len(), 3);
    }

    #[tokio::test]
    async fn test_seeded_market_quotes_every_symbol() {
        let market = SimulatedMarket::seeded(&["AAPL", "MSFT"], 2);
        assert_eq!(market.symbols().await, vec!["AAPL".to_string(), "MSFT".to_string()]);

        let quote = market.quote("AAPL", Timeframe::OneHour).await.unwrap();
        assert!(quote.price > 0.0);

        let end = quote.timestamp;
        let bars = market.history("AAPL", end - Duration::days(3), end).await.unwrap();
        assert_eq!(bars.len(), 48);
        assert!(bars.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[tokio::test]
    async fn test_seeded_depth_is_clamped() {
        let market = SimulatedMarket::seeded(&["AAPL"], i64::MAX);
        let end = market.quote("AAPL", Timeframe::OneHour).await.unwrap().timestamp;
        let bars = market
            .history("AAPL", end - Duration::days(MAX_HISTORY_DAYS + 1), end)
            .await
            .unwrap();
        assert_eq!(bars.len() as i64, MAX_HISTORY_DAYS * 24);
    }

    #[tokio::test]
    async fn test_pinned_price_wins_over_history() {
        let market = SimulatedMarket::new();
        let t0 = Utc::now() - Duration::hours(2);
        market.load_history("AAPL", vec![bar(t0, 100.0), bar(t0 + Duration::hours(1), 110.0)]).await;

        let q = market.quote("AAPL", Timeframe::OneHour).await.unwrap();
        assert_eq!(q.price, 110.0);
        assert_eq!(q.change, 10.0);

        market.set_price("AAPL", 121.0).await;
        let q = market.quote("AAPL", Timeframe::OneHour).await.unwrap();
        assert_eq!(q.price, 121.0);
    }

    #[tokio::test]
    async fn test_unknown_symbol_is_an_error() {
        let market = SimulatedMarket::new();
        assert!(market.quote("ZZZZ", Timeframe::OneDay).await.is_err());
        assert!(market.history("ZZZZ", Utc::now(), Utc::now()).await.is_err());
    }
}

//! # models::market
//!
//! Market-side value types: a point-in-time quote ([`MarketData`]), a bar of
//! history ([`HistoricalBar`]) and the multi-symbol [`MarketSnapshot`] a
//! decision provider sees on every tick.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// ─── Timeframe ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[default]
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "1d")]
    OneDay,
}

impl Timeframe {
    pub const ALL: [&'static str; 4] = ["1m", "5m", "1h", "1d"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::OneMinute   => "1m",
            Timeframe::FiveMinutes => "5m",
            Timeframe::OneHour     => "1h",
            Timeframe::OneDay      => "1d",
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            Timeframe::OneMinute   => Duration::minutes(1),
            Timeframe::FiveMinutes => Duration::minutes(5),
            Timeframe::OneHour     => Duration::hours(1),
            Timeframe::OneDay      => Duration::days(1),
        }
    }
}

impl std::str::FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Timeframe::OneMinute),
            "5m" => Ok(Timeframe::FiveMinutes),
            "1h" => Ok(Timeframe::OneHour),
            "1d" => Ok(Timeframe::OneDay),
            other => Err(format!("unknown timeframe '{other}'")),
        }
    }
}

// ─── MarketData ───────────────────────────────────────────────────────────────

/// A quote for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketData {
    pub symbol:         String,
    pub price:          f64,
    /// Absolute change versus one timeframe ago.
    pub change:         f64,
    pub change_percent: f64,
    pub volume:         f64,
    pub timestamp:      DateTime<Utc>,
}

// ─── HistoricalBar ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalBar {
    pub timestamp: DateTime<Utc>,
    pub open:      f64,
    pub high:      f64,
    pub low:       f64,
    pub close:     f64,
    pub volume:    f64,
}

// ─── MarketSnapshot ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSnapshot {
    pub quotes:   Vec<MarketData>,
    pub taken_at: DateTime<Utc>,
}

impl MarketSnapshot {
    pub fn quote(&self, symbol: &str) -> Option<&MarketData> {
        self.quotes.iter().find(|q| q.symbol == symbol)
    }

    pub fn price_updates(&self) -> Vec<PriceUpdate> {
        self.quotes.iter().map(PriceUpdate::from).collect()
    }
}

// ─── PriceUpdate ──────────────────────────────────────────────────────────────

/// Input to `Ledger::update_market_prices`.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceUpdate {
    pub symbol: String,
    pub price:  f64,
}

impl PriceUpdate {
    pub fn new(symbol: impl Into<String>, price: f64) -> Self {
        Self { symbol: symbol.into(), price }
    }
}

impl From<&MarketData> for PriceUpdate {
    fn from(data: &MarketData) -> Self {
        Self { symbol: data.symbol.clone(), price: data.price }
    }
}

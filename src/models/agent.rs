//! # models::agent
//!
//! Defines [`Agent`], a configured strategy identity with its own capital
//! ledger and trade history, plus the create/update payloads of the
//! management surface.
//!
//! `trades` is append-only: insertion order is chronological order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::trade::Trade;

// ─── ModelType ────────────────────────────────────────────────────────────────

/// The AI model an agent's decisions are meant to come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelType {
    #[default]
    #[serde(rename = "gpt-4")]
    Gpt4,
    #[serde(rename = "gpt-3.5-turbo")]
    Gpt35Turbo,
    #[serde(rename = "claude-3-opus")]
    Claude3Opus,
    #[serde(rename = "claude-3-sonnet")]
    Claude3Sonnet,
    #[serde(rename = "qwen-max")]
    QwenMax,
    #[serde(rename = "qwen-turbo")]
    QwenTurbo,
}

impl std::fmt::Display for ModelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModelType::Gpt4          => "gpt-4",
            ModelType::Gpt35Turbo    => "gpt-3.5-turbo",
            ModelType::Claude3Opus   => "claude-3-opus",
            ModelType::Claude3Sonnet => "claude-3-sonnet",
            ModelType::QwenMax       => "qwen-max",
            ModelType::QwenTurbo     => "qwen-turbo",
        };
        f.write_str(name)
    }
}

// ─── Agent ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id:           Uuid,
    pub name:         String,
    pub description:  String,
    pub owner:        String,
    pub model:        ModelType,
    /// Free-text instructions handed to the decision provider.
    pub prompt:       String,
    pub strategy:     String,
    /// Symbols quoted to the decision provider on every tick.
    pub watchlist:    Vec<String>,
    /// Initial capital the ledger account was opened with.
    pub capital:      f64,
    /// Percent return of the account, refreshed after each executed trade.
    pub total_return: f64,
    pub trades:       Vec<Trade>,
    pub is_active:    bool,
    pub created_at:   DateTime<Utc>,
    pub updated_at:   DateTime<Utc>,
}

impl Agent {
    /// Build a fresh, inactive agent. Missing fields fall back to the
    /// platform defaults.
    pub fn from_request(req: NewAgent, default_watchlist: &[String], default_capital: f64) -> Self {
        let now = Utc::now();
        let watchlist = req
            .watchlist
            .filter(|w| !w.is_empty())
            .unwrap_or_else(|| default_watchlist.to_vec());

        Self {
            id:           Uuid::new_v4(),
            name:         req.name.unwrap_or_else(|| "Unnamed Agent".to_string()),
            description:  req.description.unwrap_or_default(),
            owner:        req.owner.unwrap_or_else(|| "anonymous".to_string()),
            model:        req.model.unwrap_or_default(),
            prompt:       req.prompt.unwrap_or_default(),
            strategy:     req.strategy.unwrap_or_default(),
            watchlist,
            capital:      req.capital.unwrap_or(default_capital),
            total_return: 0.0,
            trades:       Vec::new(),
            is_active:    false,
            created_at:   now,
            updated_at:   now,
        }
    }

    /// Apply a partial update and bump `updated_at`.
    pub fn apply(&mut self, update: AgentUpdate) {
        if let Some(name) = update.name { self.name = name; }
        if let Some(description) = update.description { self.description = description; }
        if let Some(model) = update.model { self.model = model; }
        if let Some(prompt) = update.prompt { self.prompt = prompt; }
        if let Some(strategy) = update.strategy { self.strategy = strategy; }
        if let Some(watchlist) = update.watchlist.filter(|w| !w.is_empty()) {
            self.watchlist = watchlist;
        }
        self.updated_at = Utc::now();
    }
}

// ─── NewAgent ─────────────────────────────────────────────────────────────────

/// Payload of the create operation. Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAgent {
    pub name:        Option<String>,
    pub description: Option<String>,
    pub owner:       Option<String>,
    pub model:       Option<ModelType>,
    pub prompt:      Option<String>,
    pub strategy:    Option<String>,
    pub watchlist:   Option<Vec<String>>,
    pub capital:     Option<f64>,
}

// ─── AgentUpdate ──────────────────────────────────────────────────────────────

/// Partial update. Identity, capital, activity and history are not editable
/// through this payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentUpdate {
    pub name:        Option<String>,
    pub description: Option<String>,
    pub model:       Option<ModelType>,
    pub prompt:      Option<String>,
    pub strategy:    Option<String>,
    pub watchlist:   Option<Vec<String>>,
}

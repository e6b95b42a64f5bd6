//! # events
//!
//! Defines [`WsEvent`], every event the core broadcasts to monitor clients.
//!
//! Events travel on a `tokio::sync::broadcast::Sender<String>` as
//! pre-serialized JSON so the channel carries no clone-heavy payloads.

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::Trade;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WsEvent {
    #[serde(rename_all = "camelCase")]
    AgentCreated {
        agent_id: Uuid,
        name:     String,
    },

    /// Rotation installed.
    #[serde(rename_all = "camelCase")]
    AgentStarted {
        agent_id:      Uuid,
        interval_secs: u64,
    },

    #[serde(rename_all = "camelCase")]
    AgentStopped {
        agent_id: Uuid,
    },

    #[serde(rename_all = "camelCase")]
    AgentDeleted {
        agent_id: Uuid,
    },

    /// A tick filled an order.
    #[serde(rename_all = "camelCase")]
    TradeExecuted {
        agent_id:     Uuid,
        trade:        Box<Trade>,
        total_return: f64,
    },

    /// A tick failed; the rotation keeps going.
    #[serde(rename_all = "camelCase")]
    TickFailed {
        agent_id: Uuid,
        reason:   String,
    },

    /// A fire found the previous tick still running.
    #[serde(rename_all = "camelCase")]
    TickSkipped {
        agent_id: Uuid,
        reason:   String,
    },

    #[serde(rename_all = "camelCase")]
    ServerStats {
        agents:      usize,
        running:     usize,
        tick_count:  u64,
        trade_count: u64,
    },
}

impl WsEvent {
    #[inline]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"event":"SERIALIZATION_ERROR"}"#.to_string())
    }

    /// Broadcast to every subscriber. No subscribers is not an error.
    pub fn send(&self, tx: &broadcast::Sender<String>) {
        let _ = tx.send(self.to_json());
    }
}

//! # scheduler::registry
//!
//! Agent records keyed by id. Critical sections are short and never span an
//! await on anything but the lock itself.

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{Agent, AgentUpdate, Trade};

#[derive(Default)]
pub struct AgentRegistry {
    agents: RwLock<HashMap<Uuid, Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, agent: Agent) {
        self.agents.write().await.insert(agent.id, agent);
    }

    pub async fn get(&self, id: Uuid) -> Option<Agent> {
        self.agents.read().await.get(&id).cloned()
    }

    /// All agents, oldest first.
    pub async fn list(&self) -> Vec<Agent> {
        let mut agents: Vec<Agent> = self.agents.read().await.values().cloned().collect();
        agents.sort_by_key(|a| a.created_at);
        agents
    }

    pub async fn len(&self) -> usize {
        self.agents.read().await.len()
    }

    pub async fn update(&self, id: Uuid, update: AgentUpdate) -> Option<Agent> {
        let mut agents = self.agents.write().await;
        let agent = agents.get_mut(&id)?;
        agent.apply(update);
        Some(agent.clone())
    }

    pub async fn remove(&self, id: Uuid) -> Option<Agent> {
        self.agents.write().await.remove(&id)
    }

    /// Flip the activity flag. Returns the previous value, `None` if unknown.
    pub async fn set_active(&self, id: Uuid, active: bool) -> Option<bool> {
        let mut agents = self.agents.write().await;
        let agent = agents.get_mut(&id)?;
        let was = agent.is_active;
        if was != active {
            agent.is_active = active;
            agent.updated_at = Utc::now();
        }
        Some(was)
    }

    pub async fn is_active(&self, id: Uuid) -> bool {
        self.agents.read().await.get(&id).is_some_and(|a| a.is_active)
    }

    /// Append an executed trade and store the refreshed return. `false` if the
    /// agent is gone.
    pub async fn append_trade(&self, id: Uuid, trade: Trade, total_return: f64) -> bool {
        let mut agents = self.agents.write().await;
        let Some(agent) = agents.get_mut(&id) else { return false };
        agent.trades.push(trade);
        agent.total_return = total_return;
        agent.updated_at = Utc::now();
        true
    }
}

//! # scheduler
//!
//! Agent lifecycle and the periodic execution loop.
//!
//! ```text
//!  create ──▶ [inactive] ──start──▶ [running] ──stop──▶ [inactive]
//!                 │                      │
//!                 └────────delete────────┴──▶ removed (+ ledger account)
//! ```
//!
//! A running agent owns one [`PeriodicTask`] that calls
//! [`TickRunner::execute_agent_strategy`] every `tick_interval`, anchored at
//! the start time. `start` also runs one tick immediately.

pub mod registry;
pub mod task;
pub mod tick;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::decision::DecisionProvider;
use crate::events::WsEvent;
use crate::ledger::{Ledger, LedgerError};
use crate::models::{Agent, AgentUpdate, NewAgent};
use crate::tools::ToolRegistry;

pub use registry::AgentRegistry;
pub use task::PeriodicTask;
pub use tick::{SkipReason, TickOutcome, TickRunner};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("agent {0} not found")]
    NotFound(Uuid),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStats {
    pub agents:      usize,
    pub running:     usize,
    pub tick_count:  u64,
    pub trade_count: u64,
}

pub struct Scheduler {
    agents:            Arc<AgentRegistry>,
    ledger:            Arc<Ledger>,
    runner:            Arc<TickRunner>,
    tasks:             Mutex<HashMap<Uuid, PeriodicTask>>,
    events:            broadcast::Sender<String>,
    tick_interval:     Duration,
    default_watchlist: Vec<String>,
    default_capital:   f64,
}

impl Scheduler {
    pub fn new(
        config: &Config,
        agents: Arc<AgentRegistry>,
        ledger: Arc<Ledger>,
        tools: Arc<ToolRegistry>,
        decisions: Arc<dyn DecisionProvider>,
        events: broadcast::Sender<String>,
    ) -> Self {
        let runner = TickRunner::new(
            Arc::clone(&agents),
            tools,
            decisions,
            events.clone(),
        );

        Self {
            agents,
            ledger,
            runner:            Arc::new(runner),
            tasks:             Mutex::new(HashMap::new()),
            events,
            tick_interval:     config.tick_interval,
            default_watchlist: config.watchlist.clone(),
            default_capital:   config.initial_capital,
        }
    }

    // ── Management ────────────────────────────────────────────────────────────

    /// Register a new, inactive agent and open its ledger account.
    pub async fn create(&self, request: NewAgent) -> Result<Agent, SchedulerError> {
        let agent = Agent::from_request(request, &self.default_watchlist, self.default_capital);
        self.ledger.initialize_account(agent.id, agent.capital)?;
        self.agents.insert(agent.clone()).await;

        info!(agent_id = %agent.id, name = %agent.name, capital = agent.capital, "🤖 Agent created");
        WsEvent::AgentCreated { agent_id: agent.id, name: agent.name.clone() }.send(&self.events);
        Ok(agent)
    }

    /// Re-register an agent loaded from elsewhere, rebuilding its ledger
    /// account from its trade history. The agent comes back stopped, and a
    /// rotation already running under the same id is cancelled.
    pub async fn restore(&self, mut agent: Agent) -> Result<Agent, SchedulerError> {
        self.stop(agent.id).await;
        self.ledger.restore_account(agent.id, agent.capital, &agent.trades)?;
        if agent.capital != 0.0 {
            agent.total_return = self.ledger.calculate_return(agent.id, agent.capital).await?;
        }
        agent.is_active = false;
        self.agents.insert(agent.clone()).await;

        info!(agent_id = %agent.id, trades = agent.trades.len(), "🤖 Agent restored");
        Ok(agent)
    }

    pub async fn get(&self, id: Uuid) -> Option<Agent> {
        self.agents.get(id).await
    }

    pub async fn list(&self) -> Vec<Agent> {
        self.agents.list().await
    }

    pub async fn update(&self, id: Uuid, update: AgentUpdate) -> Result<Agent, SchedulerError> {
        self.agents.update(id, update).await.ok_or(SchedulerError::NotFound(id))
    }

    /// Stop, remove the record and close the ledger account. `false` if the
    /// agent did not exist.
    ///
    /// The rotation is cancelled and the record removed under the `tasks`
    /// lock, so a concurrent `start` either lands first and is cancelled here
    /// or finds the record gone.
    pub async fn delete(&self, id: Uuid) -> bool {
        let (task, removed) = {
            let mut tasks = self.tasks.lock().await;
            let task = tasks.remove(&id);
            (task, self.agents.remove(id).await)
        };
        if let Some(task) = task {
            self.cancel(id, task);
        }

        if removed.is_none() {
            return false;
        }
        self.ledger.close_account(id);
        self.runner.forget(id);

        info!(agent_id = %id, "🗑️ Agent deleted");
        WsEvent::AgentDeleted { agent_id: id }.send(&self.events);
        true
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Install the agent's rotation and run one tick right away.
    ///
    /// `Ok(false)` when the agent is already running; no second timer is
    /// created.
    pub async fn start(&self, id: Uuid) -> Result<bool, SchedulerError> {
        {
            let mut tasks = self.tasks.lock().await;
            if tasks.get(&id).is_some_and(|task| !task.is_finished()) {
                return Ok(false);
            }
            if self.agents.set_active(id, true).await.is_none() {
                return Err(SchedulerError::NotFound(id));
            }

            let runner = Arc::clone(&self.runner);
            let task = PeriodicTask::spawn(self.tick_interval, move || {
                let runner = Arc::clone(&runner);
                async move {
                    runner.execute_agent_strategy(id).await;
                }
            });
            tasks.insert(id, task);
        }

        let interval_secs = self.tick_interval.as_secs();
        info!(agent_id = %id, interval_secs, "▶️ Agent started");
        WsEvent::AgentStarted { agent_id: id, interval_secs }.send(&self.events);

        self.runner.execute_agent_strategy(id).await;
        Ok(true)
    }

    /// Cancel the rotation. `true` only if one was running; a tick already in
    /// flight completes.
    pub async fn stop(&self, id: Uuid) -> bool {
        let task = self.tasks.lock().await.remove(&id);
        self.agents.set_active(id, false).await;

        let Some(task) = task else { return false };
        self.cancel(id, task);
        true
    }

    fn cancel(&self, id: Uuid, task: PeriodicTask) {
        task.cancel();
        info!(agent_id = %id, "⏹️ Agent stopped");
        WsEvent::AgentStopped { agent_id: id }.send(&self.events);
    }

    /// One tick on demand, under the same rules as a scheduled fire.
    pub async fn run_tick(&self, id: Uuid) -> Result<TickOutcome, SchedulerError> {
        if self.agents.get(id).await.is_none() {
            return Err(SchedulerError::NotFound(id));
        }
        Ok(self.runner.execute_agent_strategy(id).await)
    }

    pub async fn is_running(&self, id: Uuid) -> bool {
        self.tasks.lock().await.get(&id).is_some_and(|task| !task.is_finished())
    }

    pub async fn running_count(&self) -> usize {
        self.tasks.lock().await.values().filter(|task| !task.is_finished()).count()
    }

    pub async fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            agents:      self.agents.len().await,
            running:     self.running_count().await,
            tick_count:  self.runner.tick_count(),
            trade_count: self.runner.trade_count(),
        }
    }

    /// Cancel every rotation. Agents keep their active flag cleared.
    pub async fn shutdown(&self) {
        let tasks: Vec<(Uuid, PeriodicTask)> = self.tasks.lock().await.drain().collect();
        for (id, task) in tasks {
            task.cancel();
            self.agents.set_active(id, false).await;
        }
        info!("Scheduler shut down");
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

//! HTTP surface over the scheduler and the tool dispatcher.

pub mod agents;
pub mod monitor;
pub mod tools;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::state::SharedState;

use agents::{
    backtest_agent, create_agent, delete_agent, get_agent, get_agent_portfolio, list_agents,
    start_agent, stop_agent, tick_agent, update_agent,
};
use monitor::{health_check, ws_monitor};
use tools::{get_tool, invoke_tool, list_tools};

pub fn router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Health / Monitor ──────────────────────────────────────────────────
        .route("/api/health",               get(health_check))
        .route("/ws/monitor",               get(ws_monitor))
        // ── Agents ────────────────────────────────────────────────────────────
        .route("/api/agents",               get(list_agents).post(create_agent))
        .route("/api/agents/:id",           get(get_agent).patch(update_agent).delete(delete_agent))
        .route("/api/agents/:id/start",     post(start_agent))
        .route("/api/agents/:id/stop",      post(stop_agent))
        .route("/api/agents/:id/tick",      post(tick_agent))
        .route("/api/agents/:id/portfolio", get(get_agent_portfolio))
        .route("/api/agents/:id/backtest",  post(backtest_agent))
        // ── Tool Protocol ─────────────────────────────────────────────────────
        .route("/api/tools",                get(list_tools))
        .route("/api/tools/:name",          get(get_tool).post(invoke_tool))
        // ── Middleware ────────────────────────────────────────────────────────
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

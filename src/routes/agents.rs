//! # routes::agents
//!
//! Agent management API.
//!
//! | Method | Path                         | Description                    |
//! |--------|------------------------------|--------------------------------|
//! | GET    | `/api/agents`                | List agents (oldest first)     |
//! | POST   | `/api/agents`                | Create an agent                |
//! | GET    | `/api/agents/:id`            | One agent with trade history   |
//! | PATCH  | `/api/agents/:id`            | Partial update                 |
//! | DELETE | `/api/agents/:id`            | Stop, remove, close account    |
//! | POST   | `/api/agents/:id/start`      | Start the rotation             |
//! | POST   | `/api/agents/:id/stop`       | Stop the rotation              |
//! | POST   | `/api/agents/:id/tick`       | Run one tick now               |
//! | GET    | `/api/agents/:id/portfolio`  | `get_portfolio` tool           |
//! | POST   | `/api/agents/:id/backtest`   | `evaluate_strategy` tool       |

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{AgentUpdate, NewAgent};
use crate::scheduler::{SkipReason, TickOutcome};
use crate::state::SharedState;
use crate::tools::builtin::{EVALUATE_STRATEGY, GET_PORTFOLIO};

/// GET /api/agents
pub async fn list_agents(State(state): State<SharedState>) -> impl IntoResponse {
    let agents = state.scheduler.list().await;
    Json(json!({
        "ok":     true,
        "count":  agents.len(),
        "agents": agents,
    }))
}

/// POST /api/agents
pub async fn create_agent(
    State(state): State<SharedState>,
    Json(body): Json<NewAgent>,
) -> Result<impl IntoResponse, AppError> {
    let agent = state.scheduler.create(body).await?;
    Ok(Json(json!({ "ok": true, "agent": agent })))
}

/// GET /api/agents/:id
pub async fn get_agent(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let agent = state
        .scheduler
        .get(id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("agent {id}")))?;
    Ok(Json(json!({ "ok": true, "agent": agent })))
}

/// PATCH /api/agents/:id
pub async fn update_agent(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(body): Json<AgentUpdate>,
) -> Result<impl IntoResponse, AppError> {
    let agent = state.scheduler.update(id, body).await?;
    Ok(Json(json!({ "ok": true, "agent": agent })))
}

/// DELETE /api/agents/:id
pub async fn delete_agent(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    if !state.scheduler.delete(id).await {
        return Err(AppError::NotFound(format!("agent {id}")));
    }
    Ok(Json(json!({ "ok": true, "deleted": id })))
}

/// POST /api/agents/:id/start: `ok:false` if already running.
pub async fn start_agent(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let started = state.scheduler.start(id).await?;
    let body = if started {
        json!({ "ok": true, "running": true })
    } else {
        json!({ "ok": false, "running": true, "error": "agent is already running" })
    };
    Ok(Json(body))
}

/// POST /api/agents/:id/stop: `ok:false` if it was not running.
pub async fn stop_agent(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    if state.scheduler.get(id).await.is_none() {
        return Err(AppError::NotFound(format!("agent {id}")));
    }
    let body = if state.scheduler.stop(id).await {
        json!({ "ok": true, "running": false })
    } else {
        json!({ "ok": false, "running": false, "error": "agent is not running" })
    };
    Ok(Json(body))
}

/// POST /api/agents/:id/tick
pub async fn tick_agent(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let body = match state.scheduler.run_tick(id).await? {
        TickOutcome::Held => json!({ "ok": true, "outcome": "held" }),
        TickOutcome::Traded(trade) => json!({ "ok": true, "outcome": "traded", "trade": trade }),
        TickOutcome::Skipped(reason) => {
            let reason = match reason {
                SkipReason::Missing  => "missing",
                SkipReason::Inactive => "inactive",
                SkipReason::Busy     => "busy",
            };
            json!({ "ok": false, "outcome": "skipped", "error": reason })
        }
        TickOutcome::Failed(error) => json!({ "ok": false, "outcome": "failed", "error": error }),
    };
    Ok(Json(body))
}

/// GET /api/agents/:id/portfolio
pub async fn get_agent_portfolio(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    if state.scheduler.get(id).await.is_none() {
        return Err(AppError::NotFound(format!("agent {id}")));
    }
    let portfolio = state
        .tools
        .invoke(GET_PORTFOLIO, json!({ "agentId": id.to_string() }))
        .await?;
    Ok(Json(json!({ "ok": true, "portfolio": portfolio })))
}

/// POST /api/agents/:id/backtest: body carries the `evaluate_strategy`
/// parameters minus `agentId`.
pub async fn backtest_agent(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    if state.scheduler.get(id).await.is_none() {
        return Err(AppError::NotFound(format!("agent {id}")));
    }

    let mut params = match body {
        Value::Object(map) => map,
        Value::Null => Default::default(),
        _ => return Err(AppError::BadRequest("body must be a JSON object".into())),
    };
    params.insert("agentId".into(), Value::String(id.to_string()));

    let report = state.tools.invoke(EVALUATE_STRATEGY, Value::Object(params)).await?;
    Ok(Json(json!({ "ok": true, "report": report })))
}

//! # routes::tools
//!
//! | Method | Path               | Description                       |
//! |--------|--------------------|-----------------------------------|
//! | GET    | `/api/tools`       | Registered tool definitions       |
//! | GET    | `/api/tools/:name` | One tool definition               |
//! | POST   | `/api/tools/:name` | Invoke a tool with a JSON body    |

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};

use crate::error::AppError;
use crate::state::SharedState;

/// GET /api/tools
pub async fn list_tools(State(state): State<SharedState>) -> impl IntoResponse {
    let tools = state.tools.list_tools().await;
    Json(json!({
        "ok":    true,
        "count": tools.len(),
        "tools": tools,
    }))
}

/// GET /api/tools/:name
pub async fn get_tool(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let tool = state
        .tools
        .definition(&name)
        .await
        .ok_or_else(|| AppError::NotFound(format!("tool {name}")))?;
    Ok(Json(json!({ "ok": true, "tool": tool })))
}

/// POST /api/tools/:name
pub async fn invoke_tool(
    State(state): State<SharedState>,
    Path(name): Path<String>,
    Json(params): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let result = state.tools.invoke(&name, params).await?;
    Ok(Json(json!({ "ok": true, "result": result })))
}

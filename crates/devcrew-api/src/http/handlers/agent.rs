//! Agent status and history handlers.

use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};

use crate::http::error::AppError;
use crate::http::extractors::query::HistoryQuery;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// GET /api/v1/agents/status - Status of every hosted agent.
pub async fn list_agent_status(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let start = Instant::now();

    let mut agents = serde_json::Map::new();
    let mut total_completed = 0;
    for (agent_id, runtime) in state.agents.iter() {
        let status = runtime.status();
        total_completed += status.metrics.tasks_completed;
        agents.insert(agent_id.clone(), to_json(&status)?);
    }

    let data = json!({
        "agents": agents,
        "system": {
            "message_bus": bus_state(&state),
            "total_tasks_completed": total_completed,
        },
        "timestamp": Utc::now().to_rfc3339(),
    });

    Ok(Json(
        ApiResponse::timed(data, start).with_link("self", "/api/v1/agents/status"),
    ))
}

/// GET /api/v1/agents/{agent}/status - Status and health of one agent.
pub async fn get_agent_status(
    State(state): State<AppState>,
    Path(agent): Path<String>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let start = Instant::now();
    let runtime = state
        .agent(&agent)
        .ok_or_else(|| AppError::AgentNotFound(agent.clone()))?;

    let data = json!({
        "status": to_json(&runtime.status())?,
        "health": to_json(&runtime.health_check(Utc::now()))?,
    });

    let history = format!("/api/v1/agents/{agent}/history");
    Ok(Json(
        ApiResponse::timed(data, start).with_link("history", &history),
    ))
}

/// GET /api/v1/agents/{agent}/history?limit=N - Recent completed tasks.
pub async fn get_agent_history(
    State(state): State<AppState>,
    Path(agent): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let start = Instant::now();
    let runtime = state
        .agent(&agent)
        .ok_or_else(|| AppError::AgentNotFound(agent.clone()))?;

    let history = runtime.history(query.limit);
    let data = json!({
        "agent_id": agent,
        "count": history.len(),
        "tasks": to_json(&history)?,
    });
    Ok(Json(ApiResponse::timed(data, start)))
}

pub(crate) fn bus_state(state: &AppState) -> &'static str {
    if state.bus.is_connected() {
        "connected"
    } else {
        "disconnected"
    }
}

pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> Result<Value, AppError> {
    serde_json::to_value(value).map_err(|e| AppError::Internal(format!("serialization failed: {e}")))
}

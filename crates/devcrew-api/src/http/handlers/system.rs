//! Health and system information.

use std::time::Instant;

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};

use devcrew_types::message::MessageType;
use devcrew_types::workflow::WorkflowType;

use crate::http::error::AppError;
use crate::http::handlers::agent::bus_state;
use crate::http::response::ApiResponse;
use crate::state::{AppState, AGENT_TYPES};

/// GET /health - Liveness plus bus and agent state. Degraded when the bus is down.
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let components: serde_json::Map<String, Value> = state
        .agents
        .iter()
        .map(|(agent_id, runtime)| {
            let health = runtime.health_check(Utc::now());
            (agent_id.clone(), json!(health.status))
        })
        .collect();

    let status = if state.bus.is_connected() {
        "healthy"
    } else {
        "degraded"
    };

    Json(json!({
        "status": status,
        "version": state.settings.app.version,
        "environment": state.settings.app.environment,
        "message_bus": bus_state(&state),
        "components": components,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// GET /api/v1/system/info
pub async fn system_info(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let start = Instant::now();
    let app = &state.settings.app;
    let message_types: Vec<&str> = MessageType::ALL.iter().map(|t| t.as_str()).collect();
    let workflow_types: Vec<&str> = WorkflowType::ALL.iter().map(|t| t.as_str()).collect();

    let data = json!({
        "platform": app.name,
        "version": app.version,
        "environment": app.environment,
        "agent_types": AGENT_TYPES,
        "message_types": message_types,
        "workflow_types": workflow_types,
        "transport": state.bus.transport_name(),
    });
    Ok(Json(ApiResponse::timed(data, start)))
}

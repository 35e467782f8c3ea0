//! Task submission and lookup handlers.
//!
//! Submission is asynchronous: the task travels over the bus as a
//! `task_request` to the agent's channel and is executed by the agent's
//! handler. Poll the status endpoint for the outcome.

use std::time::Instant;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use devcrew_types::message::{MessageType, Payload, DEFAULT_PRIORITY};

use crate::http::error::AppError;
use crate::http::handlers::agent::to_json;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Sender id used for messages originating from the HTTP API.
pub const API_SENDER: &str = "api";

#[derive(Debug, Deserialize)]
pub struct SubmitTaskRequest {
    pub agent_type: String,
    pub task_description: String,
    #[serde(default)]
    pub context: Payload,
    #[serde(default)]
    pub priority: Option<u8>,
}

/// POST /api/v1/tasks/submit - Queue a task for an agent.
pub async fn submit_task(
    State(state): State<AppState>,
    Json(body): Json<SubmitTaskRequest>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let start = Instant::now();

    if state.agent(&body.agent_type).is_none() {
        return Err(AppError::AgentNotFound(body.agent_type));
    }
    if body.task_description.trim().is_empty() {
        return Err(AppError::Validation(
            "task_description must not be empty".to_string(),
        ));
    }

    let task_id = format!("task_{}", uuid::Uuid::now_v7().simple());
    let mut payload = Payload::new();
    payload.insert("task_id".to_string(), json!(task_id));
    payload.insert("description".to_string(), json!(body.task_description));
    payload.insert("context".to_string(), Value::Object(body.context));

    let message_id = state
        .bus
        .send(
            API_SENDER,
            Some(&body.agent_type),
            MessageType::TaskRequest,
            payload,
            None,
            body.priority.unwrap_or(DEFAULT_PRIORITY),
        )
        .await?;
    tracing::info!(%task_id, agent = %body.agent_type, %message_id, "task submitted");

    let link = format!("/api/v1/tasks/{task_id}/status");
    let data = json!({
        "task_id": task_id,
        "agent_id": body.agent_type,
        "message_id": message_id,
        "status": "submitted",
    });
    Ok(Json(ApiResponse::timed(data, start).with_link("status", &link)))
}

/// GET /api/v1/tasks/{task_id}/status - Find a task on any agent.
pub async fn get_task_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let start = Instant::now();
    let task = state
        .agents
        .values()
        .find_map(|runtime| runtime.find_task(&task_id))
        .ok_or_else(|| AppError::TaskNotFound(task_id.clone()))?;

    Ok(Json(ApiResponse::timed(to_json(&task)?, start)))
}

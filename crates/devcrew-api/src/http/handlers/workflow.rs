//! Workflow handlers.
//!
//! `develop-and-review` runs a developer request then a reviewer request and
//! answers when both are done. The `/workflows` routes hand typed workflows
//! to the coordinator, which runs them in the background; poll a workflow's
//! status for its outcome.

use std::time::{Duration, Instant};

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use devcrew_types::message::{Envelope, MessageType, Payload};
use devcrew_types::workflow::WorkflowRequest;

use crate::http::error::AppError;
use crate::http::extractors::query::{CleanupQuery, WorkflowListQuery};
use crate::http::handlers::agent::to_json;
use crate::http::response::ApiResponse;
use crate::state::AppState;

const WORKFLOW_SENDER: &str = "workflow";

#[derive(Debug, Deserialize)]
pub struct DevelopAndReviewRequest {
    pub description: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub framework: Option<String>,
    #[serde(default)]
    pub requirements: Vec<String>,
}

fn default_language() -> String {
    "python".to_string()
}

/// POST /api/v1/workflow/develop-and-review
pub async fn develop_and_review(
    State(state): State<AppState>,
    Json(body): Json<DevelopAndReviewRequest>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let start = Instant::now();
    if body.description.trim().is_empty() {
        return Err(AppError::Validation("description must not be empty".to_string()));
    }
    for agent in ["developer", "reviewer"] {
        if state.agent(agent).is_none() {
            return Err(AppError::AgentNotFound(agent.to_string()));
        }
    }
    let timeout = Duration::from_secs(state.settings.agents.request_timeout_secs);

    let dev_payload = task_payload(
        &format!("workflow_dev_{}", short_id()),
        &body.description,
        json!({
            "language": body.language,
            "framework": body.framework,
            "requirements": body.requirements,
        }),
    );
    let Some(dev_reply) = state
        .bus
        .request_response(WORKFLOW_SENDER, "developer", MessageType::TaskRequest, dev_payload, timeout)
        .await?
    else {
        return Ok(Json(ApiResponse::timed(timed_out("developer", None), start)));
    };
    let development_result = task_result(&dev_reply);
    if development_result.get("status").and_then(Value::as_str) != Some("completed") {
        return Err(AppError::Internal("code generation failed".to_string()));
    }

    let review_payload = task_payload(
        &format!("workflow_review_{}", short_id()),
        "Review generated code for quality and security",
        json!({
            "code": development_result.get("result").cloned().unwrap_or(Value::Null),
            "language": body.language,
        }),
    );
    let Some(review_reply) = state
        .bus
        .request_response(WORKFLOW_SENDER, "reviewer", MessageType::TaskRequest, review_payload, timeout)
        .await?
    else {
        return Ok(Json(ApiResponse::timed(
            timed_out("reviewer", Some(development_result)),
            start,
        )));
    };

    let data = json!({
        "development_result": development_result,
        "review_result": task_result(&review_reply),
        "workflow_status": "completed",
    });
    Ok(Json(ApiResponse::timed(data, start)))
}

/// POST /api/v1/workflows - Start a workflow in the background.
pub async fn submit_workflow(
    State(state): State<AppState>,
    Json(body): Json<WorkflowRequest>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let start = Instant::now();
    let record = state.workflows.submit(body)?;
    let link = format!("/api/v1/workflows/{}", record.workflow_id);
    Ok(Json(ApiResponse::timed(to_json(&record)?, start).with_link("status", &link)))
}

/// GET /api/v1/workflows - Tracked workflows, oldest first.
pub async fn list_workflows(
    State(state): State<AppState>,
    Query(query): Query<WorkflowListQuery>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let start = Instant::now();
    let workflows = if query.active {
        state.workflows.list_active()
    } else {
        state.workflows.list()
    };
    let data = json!({
        "count": workflows.len(),
        "workflows": to_json(&workflows)?,
    });
    Ok(Json(ApiResponse::timed(data, start)))
}

/// GET /api/v1/workflows/{workflow_id}
pub async fn get_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let start = Instant::now();
    let record = state
        .workflows
        .get(&workflow_id)
        .ok_or(AppError::WorkflowNotFound(workflow_id))?;
    Ok(Json(ApiResponse::timed(to_json(&record)?, start)))
}

/// POST /api/v1/workflows/{workflow_id}/cancel
///
/// Answers with `cancelled: false` when the workflow already finished.
pub async fn cancel_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let start = Instant::now();
    let cancelled = state.workflows.cancel(&workflow_id);
    let record = state
        .workflows
        .get(&workflow_id)
        .ok_or(AppError::WorkflowNotFound(workflow_id.clone()))?;
    let data = json!({
        "workflow_id": workflow_id,
        "cancelled": cancelled,
        "status": record.status,
    });
    Ok(Json(ApiResponse::timed(data, start)))
}

/// POST /api/v1/workflows/cleanup - Trim finished workflows from history.
pub async fn cleanup_workflows(
    State(state): State<AppState>,
    Query(query): Query<CleanupQuery>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let start = Instant::now();
    let max_history = query
        .max_history
        .unwrap_or(state.settings.agents.workflow_history);
    let removed = state.workflows.cleanup_completed(max_history);
    let data = json!({
        "removed": removed,
        "remaining": state.workflows.len(),
    });
    Ok(Json(ApiResponse::timed(data, start)))
}

fn task_payload(task_id: &str, description: &str, context: Value) -> Payload {
    let mut payload = Payload::new();
    payload.insert("task_id".to_string(), json!(task_id));
    payload.insert("description".to_string(), json!(description));
    payload.insert("context".to_string(), context);
    payload
}

fn task_result(reply: &Envelope) -> Value {
    reply
        .payload
        .get("task_result")
        .cloned()
        .unwrap_or(Value::Null)
}

fn timed_out(step: &str, development_result: Option<Value>) -> Value {
    tracing::warn!(%step, "workflow step timed out");
    json!({
        "development_result": development_result,
        "review_result": null,
        "workflow_status": "timed_out",
        "timed_out_step": step,
    })
}

fn short_id() -> String {
    let id = uuid::Uuid::now_v7().simple().to_string();
    id[id.len() - 8..].to_string()
}

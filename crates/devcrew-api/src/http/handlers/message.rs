//! Raw bus access: publish, request/response, and bus statistics.

use std::time::{Duration, Instant};

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use devcrew_types::message::{channel_for, MessageType, Payload, DEFAULT_PRIORITY};

use crate::http::error::AppError;
use crate::http::handlers::agent::to_json;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Upper bound accepted for `timeout_secs`.
const MAX_REQUEST_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub sender_id: String,
    #[serde(default)]
    pub recipient_id: Option<String>,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(default)]
    pub payload: Payload,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub priority: Option<u8>,
}

#[derive(Debug, Deserialize)]
pub struct RequestMessageRequest {
    pub sender_id: String,
    pub recipient_id: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(default)]
    pub payload: Payload,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// POST /api/v1/messages - Send to one agent, or broadcast when no recipient.
pub async fn send_message(
    State(state): State<AppState>,
    Json(body): Json<SendMessageRequest>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let start = Instant::now();
    if body.sender_id.is_empty() {
        return Err(AppError::Validation("sender_id must not be empty".to_string()));
    }

    let recipient = body.recipient_id.as_deref();
    let message_id = state
        .bus
        .send(
            &body.sender_id,
            recipient,
            body.message_type,
            body.payload,
            body.correlation_id,
            body.priority.unwrap_or(DEFAULT_PRIORITY),
        )
        .await?;

    let data = json!({
        "message_id": message_id,
        "channel": channel_for(recipient),
    });
    Ok(Json(ApiResponse::timed(data, start)))
}

/// POST /api/v1/messages/request - Send and wait for the correlated reply.
pub async fn request_message(
    State(state): State<AppState>,
    Json(body): Json<RequestMessageRequest>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let start = Instant::now();
    let timeout_secs = body
        .timeout_secs
        .unwrap_or(state.settings.agents.request_timeout_secs);
    if timeout_secs == 0 || timeout_secs > MAX_REQUEST_TIMEOUT_SECS {
        return Err(AppError::Validation(format!(
            "timeout_secs must be between 1 and {MAX_REQUEST_TIMEOUT_SECS}"
        )));
    }

    let response = state
        .bus
        .request_response(
            &body.sender_id,
            &body.recipient_id,
            body.message_type,
            body.payload,
            Duration::from_secs(timeout_secs),
        )
        .await?;

    let data = json!({
        "timed_out": response.is_none(),
        "response": response.as_ref().map(to_json).transpose()?,
    });
    Ok(Json(ApiResponse::timed(data, start)))
}

/// GET /api/v1/bus - Bus connection and subscription statistics.
pub async fn get_bus_stats(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let start = Instant::now();
    let stats = state.bus.stats().await;
    let data = json!({
        "transport": stats.transport,
        "connected": stats.connected,
        "handlers": stats.handlers,
        "subscriptions": stats.subscriptions,
        "listeners": stats.listeners,
        "channels": stats.channels,
    });
    Ok(Json(ApiResponse::timed(data, start)))
}

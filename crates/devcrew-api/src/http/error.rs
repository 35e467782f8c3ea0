//! Application error type mapping to HTTP status codes and envelope format.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use devcrew_types::error::{BusError, WorkflowError};

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Message bus errors.
    Bus(BusError),
    /// No agent with this id is hosted.
    AgentNotFound(String),
    /// No running or completed task with this id.
    TaskNotFound(String),
    /// No tracked workflow with this id.
    WorkflowNotFound(String),
    /// Validation error.
    Validation(String),
    /// Generic internal error.
    Internal(String),
}

impl From<BusError> for AppError {
    fn from(e: BusError) -> Self {
        AppError::Bus(e)
    }
}

impl From<WorkflowError> for AppError {
    fn from(e: WorkflowError) -> Self {
        match e {
            WorkflowError::Invalid(msg) => AppError::Validation(msg),
            WorkflowError::Bus(e) => AppError::Bus(e),
        }
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Bus(BusError::NotConnected) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "BUS_NOT_CONNECTED",
                "Message bus not connected".to_string(),
            ),
            AppError::Bus(BusError::Connection(msg)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "BUS_UNAVAILABLE", msg.clone())
            }
            AppError::Bus(BusError::NotRegistered(id)) => (
                StatusCode::NOT_FOUND,
                "HANDLER_NOT_FOUND",
                format!("Handler '{id}' is not registered"),
            ),
            AppError::Bus(e @ BusError::InvalidPriority(_)) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", e.to_string())
            }
            AppError::Bus(e) => (StatusCode::INTERNAL_SERVER_ERROR, "BUS_ERROR", e.to_string()),
            AppError::AgentNotFound(agent) => (
                StatusCode::NOT_FOUND,
                "AGENT_NOT_FOUND",
                format!("Agent '{agent}' not found"),
            ),
            AppError::TaskNotFound(task_id) => (
                StatusCode::NOT_FOUND,
                "TASK_NOT_FOUND",
                format!("Task '{task_id}' not found"),
            ),
            AppError::WorkflowNotFound(workflow_id) => (
                StatusCode::NOT_FOUND,
                "WORKFLOW_NOT_FOUND",
                format!("Workflow '{workflow_id}' not found"),
            ),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg.clone())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        if status.is_server_error() {
            tracing::warn!(%code, %message, "request failed");
        }

        let body = json!({
            "data": null,
            "meta": {
                "request_id": uuid::Uuid::now_v7().to_string(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "response_time_ms": 0
            },
            "errors": [{
                "code": code,
                "message": message,
            }]
        });

        (
            status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_errors_map_to_status_codes() {
        assert_eq!(
            AppError::from(BusError::NotConnected).parts().0,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::from(BusError::NotRegistered("h".into())).parts().0,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::from(BusError::InvalidPriority(11)).parts().1,
            "VALIDATION_ERROR"
        );
        assert_eq!(
            AppError::from(BusError::Encode("x".into())).parts().0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn not_found_codes() {
        let (status, code, _) = AppError::AgentNotFound("tester".into()).parts();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(code, "AGENT_NOT_FOUND");
        assert_eq!(AppError::TaskNotFound("t".into()).parts().1, "TASK_NOT_FOUND");
        assert_eq!(
            AppError::WorkflowNotFound("w".into()).parts().1,
            "WORKFLOW_NOT_FOUND"
        );
    }

    #[test]
    fn workflow_errors_map_to_validation_and_bus() {
        let (status, code, _) = AppError::from(WorkflowError::Invalid("no code".into())).parts();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(code, "VALIDATION_ERROR");
        assert_eq!(
            AppError::from(WorkflowError::Bus(BusError::NotConnected)).parts().0,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}

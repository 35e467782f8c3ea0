//! Axum router configuration with middleware.
//!
//! REST routes live under `/api/v1/`; `/health` and `/ws` sit at the root.
//! Middleware: CORS and request tracing.

use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use devcrew_types::config::Settings;

use crate::http::handlers;
use crate::state::AppState;

/// Origins allowed when none are configured and debug is off.
const DEFAULT_ORIGINS: [&str; 2] = ["http://localhost:3000", "http://localhost:3001"];

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.settings);

    let api_routes = Router::new()
        // Agents
        .route("/agents/status", get(handlers::agent::list_agent_status))
        .route("/agents/{agent}/status", get(handlers::agent::get_agent_status))
        .route("/agents/{agent}/history", get(handlers::agent::get_agent_history))
        // Tasks
        .route("/tasks/submit", post(handlers::task::submit_task))
        .route("/tasks/{task_id}/status", get(handlers::task::get_task_status))
        // Raw bus access
        .route("/messages", post(handlers::message::send_message))
        .route("/messages/request", post(handlers::message::request_message))
        .route("/bus", get(handlers::message::get_bus_stats))
        // Workflow
        .route(
            "/workflow/develop-and-review",
            post(handlers::workflow::develop_and_review),
        )
        .route(
            "/workflows",
            get(handlers::workflow::list_workflows).post(handlers::workflow::submit_workflow),
        )
        .route("/workflows/cleanup", post(handlers::workflow::cleanup_workflows))
        .route("/workflows/{workflow_id}", get(handlers::workflow::get_workflow))
        .route(
            "/workflows/{workflow_id}/cancel",
            post(handlers::workflow::cancel_workflow),
        )
        .route("/system/info", get(handlers::system::system_info));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/health", get(handlers::system::health))
        .route("/ws", get(handlers::ws::ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(settings: &Settings) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    let origins = &settings.server.cors_origins;
    if origins.is_empty() && settings.app.debug {
        return layer.allow_origin(Any);
    }

    let configured: Vec<&str> = if origins.is_empty() {
        DEFAULT_ORIGINS.to_vec()
    } else {
        origins.iter().map(String::as_str).collect()
    };
    let values: Vec<HeaderValue> = configured
        .into_iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(%origin, error = %err, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(values))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use devcrew_core::message::{BoxTransport, InMemoryTransport};

    use super::*;

    async fn started_state() -> AppState {
        let state = AppState::new(Settings::default(), BoxTransport::new(InMemoryTransport::new()));
        state.start().await.unwrap();
        state
    }

    async fn call(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_bus_state() {
        let state = started_state().await;
        let router = build_router(state.clone());

        let (status, body) = call(&router, get_req("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["message_bus"], "connected");
        assert_eq!(body["components"]["developer"], "healthy");

        state.shutdown().await;
        let (_, body) = call(&router, get_req("/health")).await;
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["message_bus"], "disconnected");
    }

    #[tokio::test]
    async fn agents_status_lists_both_agents() {
        let router = build_router(started_state().await);
        let (status, body) = call(&router, get_req("/api/v1/agents/status")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["agents"]["developer"]["role"], "developer");
        assert_eq!(body["data"]["agents"]["reviewer"]["status"], "idle");
        assert_eq!(body["data"]["system"]["message_bus"], "connected");
    }

    #[tokio::test]
    async fn unknown_agent_is_404() {
        let router = build_router(started_state().await);
        let (status, body) = call(&router, get_req("/api/v1/agents/tester/status")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["errors"][0]["code"], "AGENT_NOT_FOUND");

        let (status, _) = call(
            &router,
            post_json(
                "/api/v1/tasks/submit",
                json!({"agent_type": "tester", "task_description": "x"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn submitted_task_runs_on_agent() {
        let router = build_router(started_state().await);
        let (status, body) = call(
            &router,
            post_json(
                "/api/v1/tasks/submit",
                json!({
                    "agent_type": "developer",
                    "task_description": "Create a new project",
                    "context": {"language": "rust"}
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "submitted");
        let task_id = body["data"]["task_id"].as_str().unwrap().to_string();

        let uri = format!("/api/v1/tasks/{task_id}/status");
        let task = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let (status, body) = call(&router, get_req(&uri)).await;
                if status == StatusCode::OK && body["data"]["status"] == "completed" {
                    return body;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(task["data"]["agent_id"], "developer");
        assert_eq!(task["data"]["result"]["task_type"], "project_creation");

        let (_, history) = call(&router, get_req("/api/v1/agents/developer/history?limit=5")).await;
        assert_eq!(history["data"]["count"], 1);
    }

    #[tokio::test]
    async fn empty_task_description_is_rejected() {
        let router = build_router(started_state().await);
        let (status, body) = call(
            &router,
            post_json(
                "/api/v1/tasks/submit",
                json!({"agent_type": "developer", "task_description": "  "}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"][0]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn unknown_task_is_404() {
        let router = build_router(started_state().await);
        let (status, body) = call(&router, get_req("/api/v1/tasks/task_missing/status")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["errors"][0]["code"], "TASK_NOT_FOUND");
    }

    #[tokio::test]
    async fn send_message_reports_channel() {
        let router = build_router(started_state().await);
        let (status, body) = call(
            &router,
            post_json(
                "/api/v1/messages",
                json!({"sender_id": "ops", "type": "system_alert", "payload": {"level": "info"}}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["channel"], "broadcast");
        assert!(body["data"]["message_id"].as_str().unwrap().starts_with("msg_"));

        let (status, _) = call(
            &router,
            post_json(
                "/api/v1/messages",
                json!({"sender_id": "ops", "type": "task_update", "priority": 42}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn request_returns_agent_reply() {
        let router = build_router(started_state().await);
        let (status, body) = call(
            &router,
            post_json(
                "/api/v1/messages/request",
                json!({
                    "sender_id": "cli",
                    "recipient_id": "reviewer",
                    "type": "task_request",
                    "payload": {"task_id": "t-1", "description": "security audit"},
                    "timeout_secs": 5
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["timed_out"], false);
        let reply = &body["data"]["response"];
        assert_eq!(reply["type"], "task_response");
        assert_eq!(reply["recipient_id"], "cli");
        assert_eq!(reply["payload"]["task_result"]["task_id"], "t-1");
    }

    #[tokio::test]
    async fn request_to_silent_recipient_times_out() {
        let router = build_router(started_state().await);
        let (status, body) = call(
            &router,
            post_json(
                "/api/v1/messages/request",
                json!({
                    "sender_id": "cli",
                    "recipient_id": "nobody",
                    "type": "coordination",
                    "timeout_secs": 1
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["timed_out"], true);
        assert!(body["data"]["response"].is_null());
    }

    #[tokio::test]
    async fn workflow_runs_developer_then_reviewer() {
        let router = build_router(started_state().await);
        let (status, body) = call(
            &router,
            post_json(
                "/api/v1/workflow/develop-and-review",
                json!({"description": "Generate a REST client", "language": "rust"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["workflow_status"], "completed");
        assert_eq!(body["data"]["development_result"]["agent_id"], "developer");
        assert_eq!(body["data"]["review_result"]["agent_id"], "reviewer");
    }

    async fn poll_workflow(router: &Router, workflow_id: &str, status: &str) -> Value {
        let uri = format!("/api/v1/workflows/{workflow_id}");
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let (code, body) = call(router, get_req(&uri)).await;
                if code == StatusCode::OK && body["data"]["status"] == status {
                    return body;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn submitted_workflow_completes_and_is_listed() {
        let router = build_router(started_state().await);
        let (status, body) = call(
            &router,
            post_json(
                "/api/v1/workflows",
                json!({
                    "workflow_type": "bug_fix_workflow",
                    "description": "Fix the login redirect",
                    "context": {"code": "def login(): pass"}
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "pending");
        let workflow_id = body["data"]["workflow_id"].as_str().unwrap().to_string();
        assert_eq!(
            body["_links"]["status"],
            format!("/api/v1/workflows/{workflow_id}")
        );

        let done = poll_workflow(&router, &workflow_id, "completed").await;
        assert_eq!(done["data"]["agent_results"]["fix"]["agent_id"], "developer");
        assert_eq!(done["data"]["agent_results"]["verification"]["agent_id"], "reviewer");

        let (_, all) = call(&router, get_req("/api/v1/workflows")).await;
        assert_eq!(all["data"]["count"], 1);
        let (_, active) = call(&router, get_req("/api/v1/workflows?active=true")).await;
        assert_eq!(active["data"]["count"], 0);

        let (status, body) = call(
            &router,
            post_json(&format!("/api/v1/workflows/{workflow_id}/cancel"), json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["cancelled"], false);
        assert_eq!(body["data"]["status"], "completed");

        let (status, body) =
            call(&router, post_json("/api/v1/workflows/cleanup?max_history=0", json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["removed"], 1);
        let (status, _) = call(&router, get_req(&format!("/api/v1/workflows/{workflow_id}"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn workflow_waiting_on_missing_agent_can_be_cancelled() {
        // Without attached agents the first step never gets a reply.
        let state = AppState::new(Settings::default(), BoxTransport::new(InMemoryTransport::new()));
        state.bus.connect().await.unwrap();
        let router = build_router(state);

        let (_, body) = call(
            &router,
            post_json(
                "/api/v1/workflows",
                json!({"workflow_type": "simple_development", "description": "Build a parser"}),
            ),
        )
        .await;
        let workflow_id = body["data"]["workflow_id"].as_str().unwrap().to_string();
        poll_workflow(&router, &workflow_id, "running").await;

        let (status, body) = call(
            &router,
            post_json(&format!("/api/v1/workflows/{workflow_id}/cancel"), json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["cancelled"], true);
        assert_eq!(body["data"]["status"], "cancelled");
    }

    #[tokio::test]
    async fn invalid_and_unknown_workflows() {
        let router = build_router(started_state().await);
        let (status, body) = call(
            &router,
            post_json(
                "/api/v1/workflows",
                json!({"workflow_type": "code_review_workflow", "description": "Review it"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"][0]["code"], "VALIDATION_ERROR");

        let (status, body) = call(&router, get_req("/api/v1/workflows/workflow_missing")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["errors"][0]["code"], "WORKFLOW_NOT_FOUND");

        let (status, _) = call(
            &router,
            post_json("/api/v1/workflows/workflow_missing/cancel", json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn bus_stats_and_system_info() {
        let router = build_router(started_state().await);
        let (status, body) = call(&router, get_req("/api/v1/bus")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["connected"], true);
        assert_eq!(body["data"]["transport"], "in-memory");
        assert_eq!(body["data"]["handlers"], 2);
        // Each agent is on its own channel plus broadcast.
        assert_eq!(body["data"]["subscriptions"], 4);

        let (status, body) = call(&router, get_req("/api/v1/system/info")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["agent_types"], json!(["developer", "reviewer"]));
    }

    #[tokio::test]
    async fn disconnected_bus_is_503() {
        let state = started_state().await;
        let router = build_router(state.clone());
        state.shutdown().await;

        let (status, body) = call(
            &router,
            post_json(
                "/api/v1/messages",
                json!({"sender_id": "ops", "type": "agent_status"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["errors"][0]["code"], "BUS_NOT_CONNECTED");
    }

    #[test]
    fn cors_accepts_configured_origins() {
        let mut settings = Settings::default();
        settings.app.debug = false;
        settings.server.cors_origins = vec!["https://ui.example".to_string(), "bad\norigin".to_string()];
        // Invalid origins are skipped rather than failing router construction.
        let _ = cors_layer(&settings);
    }
}

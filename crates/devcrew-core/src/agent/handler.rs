//! Bridge between the message bus and an [`AgentRuntime`].

use std::sync::Arc;

use devcrew_types::error::{BusError, HandlerError};
use devcrew_types::message::{agent_channel, Envelope, MessageType, Payload, BROADCAST_CHANNEL};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use super::runtime::AgentRuntime;
use crate::message::{HandlerResult, MessageBus, MessageHandler};

/// Executes `task_request` envelopes on an agent and replies with the result.
pub struct AgentMessageHandler {
    handler_id: String,
    runtime: Arc<AgentRuntime>,
}

impl AgentMessageHandler {
    pub fn new(runtime: Arc<AgentRuntime>) -> Self {
        Self {
            handler_id: agent_channel(runtime.agent_id()),
            runtime,
        }
    }
}

impl MessageHandler for AgentMessageHandler {
    fn handler_id(&self) -> &str {
        &self.handler_id
    }

    async fn handle(&self, envelope: &Envelope) -> HandlerResult {
        if envelope.message_type != MessageType::TaskRequest {
            debug!(
                agent_id = %self.runtime.agent_id(),
                message_type = %envelope.message_type,
                "ignoring non-task message"
            );
            return Ok(None);
        }

        let payload = &envelope.payload;
        let task_id = payload
            .get("task_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("task_{}", Uuid::now_v7().simple()));
        let description = payload
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let context = payload
            .get("context")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let result = self
            .runtime
            .execute_task(&task_id, description, &context)
            .await;
        let task_result =
            serde_json::to_value(&result).map_err(|e| HandlerError::failed(e.to_string()))?;

        let mut reply = Payload::new();
        reply.insert("task_result".to_string(), task_result);
        Ok(Some(Envelope::reply_to(
            envelope,
            self.runtime.agent_id(),
            MessageType::TaskResponse,
            reply,
        )))
    }
}

/// Register an agent's handler and subscribe it to its own channel and to
/// `broadcast`.
pub async fn attach(bus: &MessageBus, runtime: Arc<AgentRuntime>) -> Result<(), BusError> {
    let agent_id = runtime.agent_id().to_string();
    let handler = AgentMessageHandler::new(runtime);
    let handler_id = handler.handler_id.clone();
    bus.register_handler(handler);
    bus.subscribe(&agent_channel(&agent_id), &handler_id).await?;
    bus.subscribe(BROADCAST_CHANNEL, &handler_id).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::runtime::PlaceholderProcessor;
    use crate::message::{BoxTransport, InMemoryTransport};
    use devcrew_types::agent::TaskStatus;
    use devcrew_types::config::AgentSettings;
    use devcrew_types::message::into_payload;
    use serde_json::json;
    use std::time::Duration;

    fn reviewer() -> Arc<AgentRuntime> {
        Arc::new(AgentRuntime::new(
            "reviewer",
            PlaceholderProcessor::reviewer(),
            AgentSettings::default(),
        ))
    }

    #[tokio::test]
    async fn task_request_produces_correlated_response() {
        let runtime = reviewer();
        let handler = AgentMessageHandler::new(Arc::clone(&runtime));
        assert_eq!(handler.handler_id(), "agent_reviewer");

        let request = Envelope::new(
            MessageType::TaskRequest,
            "developer",
            into_payload(json!({
                "task_id": "task_7",
                "description": "Security review of auth module",
                "context": {"files": ["auth.rs"]},
            })),
        )
        .with_correlation_id("req_1");

        let reply = handler.handle(&request).await.unwrap().unwrap();
        assert_eq!(reply.message_type, MessageType::TaskResponse);
        assert_eq!(reply.recipient_id.as_deref(), Some("developer"));
        assert_eq!(reply.correlation_id.as_deref(), Some("req_1"));

        let result = &reply.payload["task_result"];
        assert_eq!(result["task_id"], json!("task_7"));
        assert_eq!(result["status"], json!("completed"));
        assert_eq!(result["result"]["task_type"], json!("security_review"));
        assert_eq!(runtime.find_task("task_7").unwrap().status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn other_message_types_are_ignored() {
        let handler = AgentMessageHandler::new(reviewer());
        let update = Envelope::new(MessageType::TaskUpdate, "developer", Payload::new());
        assert!(handler.handle(&update).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_task_id_is_generated() {
        let runtime = reviewer();
        let handler = AgentMessageHandler::new(Arc::clone(&runtime));
        let request = Envelope::new(
            MessageType::TaskRequest,
            "developer",
            into_payload(json!({"description": "quick look"})),
        );
        let reply = handler.handle(&request).await.unwrap().unwrap();
        let task_id = reply.payload["task_result"]["task_id"].as_str().unwrap();
        assert!(task_id.starts_with("task_"));
    }

    #[tokio::test]
    async fn attached_agent_answers_requests_over_the_bus() {
        let bus = MessageBus::new(BoxTransport::new(InMemoryTransport::new()));
        bus.connect().await.unwrap();
        attach(&bus, reviewer()).await.unwrap();
        assert_eq!(
            bus.channels(),
            vec!["agent_reviewer".to_string(), "broadcast".to_string()]
        );

        let reply = bus
            .request_response(
                "developer",
                "reviewer",
                MessageType::TaskRequest,
                into_payload(json!({"description": "style pass"})),
                Duration::from_secs(2),
            )
            .await
            .unwrap()
            .expect("reviewer should answer");
        assert_eq!(
            reply.payload["task_result"]["result"]["task_type"],
            json!("style_review")
        );
    }
}

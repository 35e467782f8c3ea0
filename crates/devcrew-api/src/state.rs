//! Application state wiring the bus and the agent runtimes together.
//!
//! AppState is used by both the CLI commands and the HTTP/WebSocket
//! handlers. Cloning is cheap; all members are shared.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use devcrew_core::agent::{self, AgentRuntime, PlaceholderProcessor};
use devcrew_core::message::{BoxTransport, InMemoryTransport, MessageBus};
use devcrew_core::workflow::WorkflowCoordinator;
use devcrew_infra::RedisTransport;
use devcrew_types::config::Settings;
use devcrew_types::error::BusError;

/// Agents hosted by `devcrew serve`.
pub const AGENT_TYPES: [&str; 2] = ["developer", "reviewer"];

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub bus: MessageBus,
    /// Agent runtimes keyed by agent id.
    pub agents: Arc<BTreeMap<String, Arc<AgentRuntime>>>,
    pub workflows: WorkflowCoordinator,
    pub settings: Arc<Settings>,
}

impl AppState {
    /// Build state over the transport selected by settings. Does not connect.
    pub fn from_settings(settings: Settings, in_memory: bool) -> anyhow::Result<Self> {
        let transport = if in_memory {
            BoxTransport::new(InMemoryTransport::new())
        } else {
            BoxTransport::new(RedisTransport::new(&settings.redis)?)
        };
        Ok(Self::new(settings, transport))
    }

    pub fn new(settings: Settings, transport: BoxTransport) -> Self {
        let agents = AGENT_TYPES
            .iter()
            .map(|&agent_type| {
                let processor = match agent_type {
                    "developer" => PlaceholderProcessor::developer(),
                    "reviewer" => PlaceholderProcessor::reviewer(),
                    other => PlaceholderProcessor::for_role(other),
                };
                let runtime = AgentRuntime::new(agent_type, processor, settings.agents.clone());
                (agent_type.to_string(), Arc::new(runtime))
            })
            .collect();

        let bus = MessageBus::new(transport);
        let workflows = WorkflowCoordinator::new(
            bus.clone(),
            Duration::from_secs(settings.agents.request_timeout_secs),
            settings.agents.workflow_history,
        );

        Self {
            bus,
            agents: Arc::new(agents),
            workflows,
            settings: Arc::new(settings),
        }
    }

    /// Connect the bus and attach every agent to its channels.
    pub async fn start(&self) -> Result<(), BusError> {
        self.bus.connect().await?;
        for runtime in self.agents.values() {
            agent::attach(&self.bus, Arc::clone(runtime)).await?;
        }
        tracing::info!(agents = self.agents.len(), "agents attached to message bus");
        Ok(())
    }

    /// Stop all listeners and release the broker connection.
    pub async fn shutdown(&self) {
        self.bus.disconnect().await;
    }

    pub fn agent(&self, agent_id: &str) -> Option<&Arc<AgentRuntime>> {
        self.agents.get(agent_id)
    }
}

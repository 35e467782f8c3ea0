//! Workflow coordinator: runs step plans over the bus and tracks each run.
//!
//! Every step is a `task_request` sent with `request_response` to the
//! step's agent, using the workflow id as the sender so replies land on the
//! run's own reply channel. Runs execute in background tasks; each has a
//! `CancellationToken` so `cancel` stops it between or during steps.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use devcrew_types::agent::{TaskResult, TaskStatus};
use devcrew_types::error::{BusError, WorkflowError};
use devcrew_types::message::{MessageType, Payload};
use devcrew_types::workflow::{
    WorkflowRecord, WorkflowRequest, WorkflowStatus, DEFAULT_WORKFLOW_TIMEOUT_SECS,
};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::plan::{plan, WorkflowStep};
use crate::message::MessageBus;

/// Tracks and executes workflow runs.
#[derive(Clone)]
pub struct WorkflowCoordinator {
    bus: MessageBus,
    records: Arc<DashMap<String, WorkflowRecord>>,
    /// Cancellation tokens of runs that have not finished, keyed by workflow id.
    cancellation_tokens: Arc<DashMap<String, CancellationToken>>,
    step_timeout: Duration,
    max_history: usize,
}

impl WorkflowCoordinator {
    /// `step_timeout` bounds each agent request; `max_history` caps the
    /// finished runs kept after each run ends.
    pub fn new(bus: MessageBus, step_timeout: Duration, max_history: usize) -> Self {
        Self {
            bus,
            records: Arc::new(DashMap::new()),
            cancellation_tokens: Arc::new(DashMap::new()),
            step_timeout,
            max_history,
        }
    }

    /// Validate and start a workflow in the background.
    ///
    /// Returns the pending record; poll [`get`](Self::get) for progress.
    pub fn submit(&self, request: WorkflowRequest) -> Result<WorkflowRecord, WorkflowError> {
        let steps = plan(&request)?;
        if !self.bus.is_connected() {
            return Err(BusError::NotConnected.into());
        }

        let workflow_id = format!("workflow_{}", Uuid::now_v7().simple());
        let mut record = WorkflowRecord::pending(&workflow_id, request.workflow_type);
        record
            .metadata
            .insert("description".to_string(), json!(request.description));
        record
            .metadata
            .insert("priority".to_string(), json!(request.priority));
        record.metadata.insert(
            "steps".to_string(),
            json!(steps.iter().map(|s| s.name).collect::<Vec<_>>()),
        );
        self.records.insert(workflow_id.clone(), record.clone());

        let token = CancellationToken::new();
        self.cancellation_tokens
            .insert(workflow_id.clone(), token.clone());

        info!(%workflow_id, workflow_type = %request.workflow_type, steps = steps.len(), "workflow submitted");
        let coordinator = self.clone();
        tokio::spawn(async move {
            coordinator.run(workflow_id, request, steps, token).await;
        });
        Ok(record)
    }

    async fn run(
        &self,
        workflow_id: String,
        request: WorkflowRequest,
        steps: Vec<WorkflowStep>,
        token: CancellationToken,
    ) {
        if !self.mark_running(&workflow_id) {
            debug!(%workflow_id, "workflow cancelled before start");
            self.cancellation_tokens.remove(&workflow_id);
            return;
        }

        let limit = Duration::from_secs(request.timeout_secs.unwrap_or(DEFAULT_WORKFLOW_TIMEOUT_SECS));
        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            result = tokio::time::timeout(limit, self.execute_steps(&workflow_id, &request, steps)) => Some(result),
        };
        self.cancellation_tokens.remove(&workflow_id);

        match outcome {
            None => debug!(%workflow_id, "workflow stopped by cancellation"),
            Some(Err(_)) => {
                let reason = format!("workflow timed out after {}s", limit.as_secs());
                error!(%workflow_id, %reason, "workflow failed");
                self.finish(&workflow_id, WorkflowStatus::Failed, None, Some(reason));
            }
            Some(Ok(Err(reason))) => {
                error!(%workflow_id, %reason, "workflow failed");
                self.finish(&workflow_id, WorkflowStatus::Failed, None, Some(reason));
            }
            Some(Ok(Ok(results))) => {
                info!(%workflow_id, "workflow completed");
                self.finish(&workflow_id, WorkflowStatus::Completed, Some(results), None);
            }
        }

        self.cleanup_completed(self.max_history);
    }

    /// Run the steps in order, recording each task result as it arrives.
    async fn execute_steps(
        &self,
        workflow_id: &str,
        request: &WorkflowRequest,
        steps: Vec<WorkflowStep>,
    ) -> Result<Payload, String> {
        let mut results = Payload::new();
        let mut agents_used: Vec<&str> = Vec::new();
        let mut previous: Option<Value> = None;

        for step in steps {
            let mut context = step.context;
            if step.builds_on_previous {
                if let Some(previous) = &previous {
                    context.insert("code".to_string(), previous.clone());
                }
            }

            let mut payload = Payload::new();
            payload.insert("task_id".to_string(), json!(format!("{workflow_id}_{}", step.name)));
            payload.insert("description".to_string(), json!(step.description));
            payload.insert("context".to_string(), Value::Object(context));

            debug!(%workflow_id, step = step.name, agent = step.agent, "running workflow step");
            let reply = self
                .bus
                .request_response(
                    workflow_id,
                    step.agent,
                    MessageType::TaskRequest,
                    payload,
                    self.step_timeout,
                )
                .await
                .map_err(|e| format!("step {} could not reach {}: {e}", step.name, step.agent))?
                .ok_or_else(|| {
                    format!(
                        "step {} timed out after {:?} waiting for {}",
                        step.name, self.step_timeout, step.agent
                    )
                })?;

            let task: TaskResult = reply
                .payload
                .get("task_result")
                .cloned()
                .ok_or_else(|| format!("step {} reply carried no task_result", step.name))
                .and_then(|value| {
                    serde_json::from_value(value)
                        .map_err(|e| format!("step {} reply is malformed: {e}", step.name))
                })?;

            if let Some(mut record) = self.records.get_mut(workflow_id) {
                record.agent_results.insert(step.name.to_string(), task.clone());
            }
            if task.status != TaskStatus::Completed {
                return Err(format!(
                    "step {} failed: {}",
                    step.name,
                    task.error.as_deref().unwrap_or("unknown error")
                ));
            }

            results.insert(
                format!("{}_result", step.name),
                task.result.clone().unwrap_or(Value::Null),
            );
            previous = task.result;
            if !agents_used.contains(&step.agent) {
                agents_used.push(step.agent);
            }
        }

        results.insert("workflow_type".to_string(), json!(request.workflow_type));
        results.insert("agents_used".to_string(), json!(agents_used));
        results.insert("status".to_string(), json!("completed"));
        Ok(results)
    }

    fn mark_running(&self, workflow_id: &str) -> bool {
        match self.records.get_mut(workflow_id) {
            Some(mut record) if record.status == WorkflowStatus::Pending => {
                record.status = WorkflowStatus::Running;
                true
            }
            _ => false,
        }
    }

    /// Record a terminal outcome unless the run was already cancelled.
    fn finish(
        &self,
        workflow_id: &str,
        status: WorkflowStatus,
        results: Option<Payload>,
        error_message: Option<String>,
    ) {
        let Some(mut record) = self.records.get_mut(workflow_id) else {
            return;
        };
        if record.status.is_terminal() {
            return;
        }
        record.finish(status, Utc::now());
        if let Some(results) = results {
            record.results = results;
        }
        record.error_message = error_message;
    }

    pub fn get(&self, workflow_id: &str) -> Option<WorkflowRecord> {
        self.records.get(workflow_id).map(|r| r.clone())
    }

    /// Pending and running workflows, oldest first.
    pub fn list_active(&self) -> Vec<WorkflowRecord> {
        let mut active: Vec<WorkflowRecord> = self
            .records
            .iter()
            .filter(|r| r.status.is_active())
            .map(|r| r.clone())
            .collect();
        active.sort_by_key(|r| r.started_at);
        active
    }

    /// Every tracked workflow, oldest first.
    pub fn list(&self) -> Vec<WorkflowRecord> {
        let mut all: Vec<WorkflowRecord> = self.records.iter().map(|r| r.clone()).collect();
        all.sort_by_key(|r| r.started_at);
        all
    }

    /// Cancel a pending or running workflow.
    ///
    /// Returns `false` when the id is unknown or the run already finished.
    pub fn cancel(&self, workflow_id: &str) -> bool {
        {
            let Some(mut record) = self.records.get_mut(workflow_id) else {
                return false;
            };
            if record.status.is_terminal() {
                return false;
            }
            record.finish(WorkflowStatus::Cancelled, Utc::now());
        }
        if let Some((_, token)) = self.cancellation_tokens.remove(workflow_id) {
            token.cancel();
        }
        info!(%workflow_id, "workflow cancelled");
        true
    }

    /// Drop the oldest finished workflows beyond `max_history`.
    ///
    /// Returns how many were removed. Active runs are never removed.
    pub fn cleanup_completed(&self, max_history: usize) -> usize {
        let mut finished: Vec<(String, chrono::DateTime<Utc>)> = self
            .records
            .iter()
            .filter(|r| r.status.is_terminal())
            .map(|r| (r.workflow_id.clone(), r.finished_at()))
            .collect();
        if finished.len() <= max_history {
            return 0;
        }

        // Newest first; everything past `max_history` goes.
        finished.sort_by(|a, b| b.1.cmp(&a.1));
        let removed = finished
            .into_iter()
            .skip(max_history)
            .filter(|(id, _)| {
                self.records
                    .remove_if(id, |_, r| r.status.is_terminal())
                    .is_some()
            })
            .count();
        if removed > 0 {
            info!(removed, max_history, "trimmed finished workflows");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl std::fmt::Debug for WorkflowCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowCoordinator")
            .field("workflows", &self.records.len())
            .field("step_timeout", &self.step_timeout)
            .field("max_history", &self.max_history)
            .finish()
    }
}

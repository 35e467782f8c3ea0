//! Agent task execution and bookkeeping.
//!
//! An [`AgentRuntime`] owns one agent's running tasks, bounded completion
//! history, and metrics. The actual work is delegated to a [`TaskProcessor`].

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use devcrew_types::agent::{
    ActivityState, AgentHealth, AgentMetrics, AgentStatusReport, HealthState, TaskResult,
    TaskStatus,
};
use devcrew_types::config::AgentSettings;
use devcrew_types::message::Payload;
use futures_util::future::BoxFuture;
use serde_json::{json, Value};
use tracing::{error, info};

/// Performs the work behind a task.
pub trait TaskProcessor: Send + Sync {
    /// Role name reported in status views ("developer", "reviewer").
    fn role(&self) -> &str;

    fn process<'a>(
        &'a self,
        description: &'a str,
        context: &'a Payload,
    ) -> BoxFuture<'a, Result<Value, String>>;
}

/// Keyword routes for classifying a task description: first match wins.
type Routes = &'static [(&'static [&'static str], &'static str)];

const DEVELOPER_ROUTES: Routes = &[
    (&["project", "structure", "boilerplate"], "project_creation"),
    (&["generate", "create", "implement", "write"], "code_generation"),
    (&["analyze", "review", "examine", "understand"], "code_analysis"),
    (&["refactor", "improve", "optimize", "clean"], "code_refactoring"),
];

const REVIEWER_ROUTES: Routes = &[
    (&["security", "vulnerability", "secure"], "security_review"),
    (&["quality", "metrics", "maintainability"], "quality_review"),
    (&["style", "format", "pep8", "lint"], "style_review"),
    (&["full", "comprehensive", "complete"], "full_review"),
];

/// Processor that classifies and acknowledges a task without doing it.
pub struct PlaceholderProcessor {
    role: String,
    routes: Routes,
    fallback: &'static str,
}

impl PlaceholderProcessor {
    pub fn developer() -> Self {
        Self {
            role: "developer".to_string(),
            routes: DEVELOPER_ROUTES,
            fallback: "general_development",
        }
    }

    pub fn reviewer() -> Self {
        Self {
            role: "reviewer".to_string(),
            routes: REVIEWER_ROUTES,
            fallback: "general_review",
        }
    }

    /// Processor for an arbitrary role with no task classification.
    pub fn for_role(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            routes: &[],
            fallback: "general",
        }
    }

    /// Classify a description by the first keyword group it mentions.
    pub fn classify(&self, description: &str) -> &'static str {
        let lower = description.to_lowercase();
        self.routes
            .iter()
            .find(|(keywords, _)| keywords.iter().any(|k| lower.contains(k)))
            .map(|(_, kind)| *kind)
            .unwrap_or(self.fallback)
    }
}

impl TaskProcessor for PlaceholderProcessor {
    fn role(&self) -> &str {
        &self.role
    }

    fn process<'a>(
        &'a self,
        description: &'a str,
        context: &'a Payload,
    ) -> BoxFuture<'a, Result<Value, String>> {
        Box::pin(async move {
            if description.trim().is_empty() {
                return Err("task description is empty".to_string());
            }
            let context_keys: Vec<&String> = context.keys().collect();
            Ok(json!({
                "status": "acknowledged",
                "role": self.role,
                "task_type": self.classify(description),
                "description": description,
                "context_keys": context_keys,
            }))
        })
    }
}

struct RuntimeState {
    current: HashMap<String, TaskResult>,
    history: VecDeque<TaskResult>,
    metrics: AgentMetrics,
}

/// One agent's execution state.
pub struct AgentRuntime {
    agent_id: String,
    processor: Box<dyn TaskProcessor>,
    settings: AgentSettings,
    started_at: DateTime<Utc>,
    state: Mutex<RuntimeState>,
}

impl AgentRuntime {
    pub fn new(
        agent_id: impl Into<String>,
        processor: impl TaskProcessor + 'static,
        settings: AgentSettings,
    ) -> Self {
        let agent_id = agent_id.into();
        Self {
            state: Mutex::new(RuntimeState {
                current: HashMap::new(),
                history: VecDeque::new(),
                metrics: AgentMetrics::new(agent_id.clone()),
            }),
            agent_id,
            processor: Box::new(processor),
            settings,
            started_at: Utc::now(),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn role(&self) -> &str {
        self.processor.role()
    }

    fn lock(&self) -> MutexGuard<'_, RuntimeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a task to completion, recording its outcome.
    ///
    /// Processor failures are captured in the returned result, never raised.
    pub async fn execute_task(
        &self,
        task_id: &str,
        description: &str,
        context: &Payload,
    ) -> TaskResult {
        let mut task = TaskResult::running(task_id, &self.agent_id);
        task.metadata
            .insert("description".to_string(), Value::String(description.to_string()));
        self.lock().current.insert(task_id.to_string(), task.clone());
        info!(agent_id = %self.agent_id, %task_id, "starting task");

        let started = Instant::now();
        let outcome = self.processor.process(description, context).await;
        let elapsed = started.elapsed().as_secs_f64();
        let now = Utc::now();

        task.completed_at = Some(now);
        task.execution_time_secs = Some(elapsed);
        match outcome {
            Ok(value) => {
                task.status = TaskStatus::Completed;
                task.result = Some(value);
                info!(agent_id = %self.agent_id, %task_id, elapsed_secs = elapsed, "task completed");
            }
            Err(reason) => {
                task.status = TaskStatus::Failed;
                error!(agent_id = %self.agent_id, %task_id, error = %reason, "task failed");
                task.error = Some(reason);
            }
        }

        let mut state = self.lock();
        state.current.remove(task_id);
        match task.status {
            TaskStatus::Completed => state.metrics.record_success(elapsed, now),
            _ => state.metrics.record_failure(now),
        }
        state.history.push_back(task.clone());
        let limit = self.settings.history_limit;
        if state.history.len() > limit {
            let keep = limit / 2;
            let excess = state.history.len() - keep;
            state.history.drain(..excess);
        }
        task
    }

    pub fn status(&self) -> AgentStatusReport {
        let state = self.lock();
        let current_tasks = state.current.len();
        AgentStatusReport {
            agent_id: self.agent_id.clone(),
            role: self.role().to_string(),
            status: if current_tasks == 0 {
                ActivityState::Idle
            } else {
                ActivityState::Busy
            },
            current_tasks,
            metrics: state.metrics.clone(),
            started_at: self.started_at,
        }
    }

    /// The newest `limit` completed tasks, oldest first.
    pub fn history(&self, limit: usize) -> Vec<TaskResult> {
        let state = self.lock();
        let skip = state.history.len().saturating_sub(limit);
        state.history.iter().skip(skip).cloned().collect()
    }

    /// Look a task up among running tasks, then history.
    pub fn find_task(&self, task_id: &str) -> Option<TaskResult> {
        let state = self.lock();
        state.current.get(task_id).cloned().or_else(|| {
            state
                .history
                .iter()
                .rev()
                .find(|t| t.task_id == task_id)
                .cloned()
        })
    }

    pub fn metrics(&self) -> AgentMetrics {
        self.lock().metrics.clone()
    }

    pub fn health_check(&self, now: DateTime<Utc>) -> AgentHealth {
        let state = self.lock();
        let mut warnings = Vec::new();
        if let Some(last) = state.metrics.last_activity {
            let idle = (now - last).num_seconds();
            if idle > self.settings.inactivity_warning_secs as i64 {
                warnings.push(format!("agent inactive for {idle} seconds"));
            }
        }
        AgentHealth {
            agent_id: self.agent_id.clone(),
            status: HealthState::Healthy,
            timestamp: now,
            current_tasks: state.current.len(),
            metrics: state.metrics.clone(),
            warnings,
        }
    }
}

impl std::fmt::Debug for AgentRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRuntime")
            .field("agent_id", &self.agent_id)
            .field("role", &self.role())
            .finish()
    }
}

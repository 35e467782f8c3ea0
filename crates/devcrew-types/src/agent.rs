//! Agent task bookkeeping types.
//!
//! `TaskResult` records one task's lifecycle; `AgentMetrics` aggregates an
//! agent's outcomes; `AgentStatusReport` and `AgentHealth` are the read-only
//! views served over the API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Outcome of a single task executed by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub agent_id: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_secs: Option<f64>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl TaskResult {
    /// A freshly started task.
    pub fn running(task_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            agent_id: agent_id.into(),
            status: TaskStatus::Running,
            result: None,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
            execution_time_secs: None,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// Running performance counters for an agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub agent_id: String,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub total_execution_time_secs: f64,
    pub average_execution_time_secs: f64,
    /// Completed over all finished tasks, in [0, 1].
    pub success_rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,
}

impl AgentMetrics {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            ..Self::default()
        }
    }

    pub fn record_success(&mut self, elapsed_secs: f64, at: DateTime<Utc>) {
        self.tasks_completed += 1;
        self.total_execution_time_secs += elapsed_secs;
        self.average_execution_time_secs =
            self.total_execution_time_secs / self.tasks_completed as f64;
        self.refresh_success_rate();
        self.last_activity = Some(at);
    }

    pub fn record_failure(&mut self, at: DateTime<Utc>) {
        self.tasks_failed += 1;
        self.refresh_success_rate();
        self.last_activity = Some(at);
    }

    fn refresh_success_rate(&mut self) {
        let finished = self.tasks_completed + self.tasks_failed;
        self.success_rate = if finished == 0 {
            0.0
        } else {
            self.tasks_completed as f64 / finished as f64
        };
    }
}

/// Whether an agent currently has work in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityState {
    Idle,
    Busy,
}

/// Snapshot of an agent for status endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatusReport {
    pub agent_id: String,
    pub role: String,
    pub status: ActivityState,
    pub current_tasks: usize,
    pub metrics: AgentMetrics,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Unhealthy,
}

/// Result of an agent health check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentHealth {
    pub agent_id: String,
    pub status: HealthState,
    pub timestamp: DateTime<Utc>,
    pub current_tasks: usize,
    pub metrics: AgentMetrics,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_success_rate_and_average() {
        let mut m = AgentMetrics::new("dev");
        let now = Utc::now();
        m.record_success(2.0, now);
        m.record_success(4.0, now);
        m.record_failure(now);

        assert_eq!(m.tasks_completed, 2);
        assert_eq!(m.tasks_failed, 1);
        assert!((m.average_execution_time_secs - 3.0).abs() < f64::EPSILON);
        assert!((m.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(m.last_activity, Some(now));
    }

    #[test]
    fn test_metrics_failure_only() {
        let mut m = AgentMetrics::new("dev");
        m.record_failure(Utc::now());
        assert_eq!(m.success_rate, 0.0);
        assert_eq!(m.average_execution_time_secs, 0.0);
    }

    #[test]
    fn test_task_result_serde_skips_empty_fields() {
        let r = TaskResult::running("task_1", "dev");
        let json = serde_json::to_string(&r).unwrap();
        assert!(json.contains("\"status\":\"running\""));
        assert!(!json.contains("\"error\""));
        let parsed: TaskResult = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, r);
        assert!(!parsed.is_finished());
    }
}

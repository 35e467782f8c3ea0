//! Multi-agent workflow types.
//!
//! A workflow is a fixed sequence of agent tasks chosen by its
//! [`WorkflowType`]. Each run is tracked as a [`WorkflowRecord`] from
//! submission until it is trimmed from history.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::TaskResult;
use crate::message::{Payload, DEFAULT_PRIORITY};

/// Default overall time limit for one workflow run.
pub const DEFAULT_WORKFLOW_TIMEOUT_SECS: u64 = 300;

/// Kind of development workflow to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    SimpleDevelopment,
    CodeReviewWorkflow,
    FullDevelopmentCycle,
    ArchitectureDesign,
    BugFixWorkflow,
    RefactoringWorkflow,
}

impl WorkflowType {
    pub const ALL: [WorkflowType; 6] = [
        WorkflowType::SimpleDevelopment,
        WorkflowType::CodeReviewWorkflow,
        WorkflowType::FullDevelopmentCycle,
        WorkflowType::ArchitectureDesign,
        WorkflowType::BugFixWorkflow,
        WorkflowType::RefactoringWorkflow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowType::SimpleDevelopment => "simple_development",
            WorkflowType::CodeReviewWorkflow => "code_review_workflow",
            WorkflowType::FullDevelopmentCycle => "full_development_cycle",
            WorkflowType::ArchitectureDesign => "architecture_design",
            WorkflowType::BugFixWorkflow => "bug_fix_workflow",
            WorkflowType::RefactoringWorkflow => "refactoring_workflow",
        }
    }
}

impl fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    /// Pending or running.
    pub fn is_active(&self) -> bool {
        matches!(self, WorkflowStatus::Pending | WorkflowStatus::Running)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

/// A request to run a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRequest {
    pub workflow_type: WorkflowType,
    pub description: String,
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub context: Payload,
    #[serde(default = "default_priority")]
    pub priority: u8,
    /// Overall limit in seconds; `None` uses [`DEFAULT_WORKFLOW_TIMEOUT_SECS`].
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_priority() -> u8 {
    DEFAULT_PRIORITY
}

impl WorkflowRequest {
    pub fn new(workflow_type: WorkflowType, description: impl Into<String>) -> Self {
        Self {
            workflow_type,
            description: description.into(),
            requirements: Vec::new(),
            context: Payload::new(),
            priority: DEFAULT_PRIORITY,
            timeout_secs: None,
        }
    }

    pub fn with_context(mut self, context: Payload) -> Self {
        self.context = context;
        self
    }
}

/// Tracked state of one workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub workflow_id: String,
    pub workflow_type: WorkflowType,
    pub status: WorkflowStatus,
    /// Summary produced when the run completes.
    #[serde(default)]
    pub results: Payload,
    /// Task results keyed by step name.
    #[serde(default)]
    pub agent_results: BTreeMap<String, TaskResult>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub metadata: Payload,
}

impl WorkflowRecord {
    pub fn pending(workflow_id: impl Into<String>, workflow_type: WorkflowType) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            workflow_type,
            status: WorkflowStatus::Pending,
            results: Payload::new(),
            agent_results: BTreeMap::new(),
            started_at: Utc::now(),
            completed_at: None,
            execution_time_secs: None,
            error_message: None,
            metadata: Payload::new(),
        }
    }

    /// Move to a terminal status, stamping completion time and duration.
    pub fn finish(&mut self, status: WorkflowStatus, at: DateTime<Utc>) {
        self.status = status;
        self.completed_at = Some(at);
        let elapsed = (at - self.started_at).num_milliseconds().max(0) as f64 / 1000.0;
        self.execution_time_secs = Some(elapsed);
    }

    /// Time used to order finished runs for history trimming.
    pub fn finished_at(&self) -> DateTime<Utc> {
        self.completed_at.unwrap_or(self.started_at)
    }
}

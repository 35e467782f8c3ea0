//! Query parameter extractors for list endpoints.

use serde::Deserialize;

/// Query parameters for the agent history endpoint.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Maximum tasks returned, newest last.
    #[serde(default = "default_limit")]
    pub limit: usize,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            limit: default_limit(),
        }
    }
}

fn default_limit() -> usize {
    10
}

/// Query parameters for the workflow list endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct WorkflowListQuery {
    /// Only pending and running workflows.
    #[serde(default)]
    pub active: bool,
}

/// Query parameters for the workflow history cleanup endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct CleanupQuery {
    /// Finished workflows to keep (default: agents.workflow_history).
    pub max_history: Option<usize>,
}

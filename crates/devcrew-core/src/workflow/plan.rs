//! Step plans for each workflow type.

use devcrew_types::error::WorkflowError;
use devcrew_types::message::{Payload, MAX_PRIORITY, MIN_PRIORITY};
use devcrew_types::workflow::{WorkflowRequest, WorkflowType};
use serde_json::{json, Value};

pub const DEVELOPER: &str = "developer";
pub const REVIEWER: &str = "reviewer";

/// One agent task within a workflow.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowStep {
    /// Key under which the step's task result is recorded.
    pub name: &'static str,
    pub agent: &'static str,
    pub description: String,
    pub context: Payload,
    /// Hand the previous step's result to this one as `context.code`.
    pub builds_on_previous: bool,
}

impl WorkflowStep {
    fn new(name: &'static str, agent: &'static str, description: String, context: Payload) -> Self {
        Self {
            name,
            agent,
            description,
            context,
            builds_on_previous: false,
        }
    }

    fn building_on_previous(mut self) -> Self {
        self.builds_on_previous = true;
        self
    }
}

/// Validate `request` and lay out its steps in execution order.
pub fn plan(request: &WorkflowRequest) -> Result<Vec<WorkflowStep>, WorkflowError> {
    let description = request.description.trim();
    if description.is_empty() {
        return Err(WorkflowError::Invalid("description must not be empty".to_string()));
    }
    if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&request.priority) {
        return Err(WorkflowError::Invalid(format!(
            "priority {} out of range ({MIN_PRIORITY}-{MAX_PRIORITY})",
            request.priority
        )));
    }

    let mut context = request.context.clone();
    if !request.requirements.is_empty() {
        context.insert("requirements".to_string(), json!(request.requirements));
    }

    let steps = match request.workflow_type {
        WorkflowType::SimpleDevelopment => vec![WorkflowStep::new(
            "development",
            DEVELOPER,
            description.to_string(),
            context,
        )],

        WorkflowType::CodeReviewWorkflow => {
            let Some(code) = context_str(&request.context, "code") else {
                return Err(WorkflowError::Invalid(
                    "code_review_workflow needs `code` in context".to_string(),
                ));
            };
            vec![WorkflowStep::new(
                "review",
                REVIEWER,
                format!("Review the following code for quality and security:\n\n{code}"),
                context,
            )]
        }

        WorkflowType::FullDevelopmentCycle => vec![
            WorkflowStep::new("development", DEVELOPER, description.to_string(), context.clone()),
            WorkflowStep::new(
                "review",
                REVIEWER,
                "Review the developed code for quality and security".to_string(),
                context,
            )
            .building_on_previous(),
        ],

        WorkflowType::ArchitectureDesign => vec![
            WorkflowStep::new(
                "architecture",
                DEVELOPER,
                format!("Design a software architecture for: {description}"),
                context.clone(),
            ),
            WorkflowStep::new(
                "architecture_review",
                REVIEWER,
                "Review the proposed architecture for scalability and security concerns"
                    .to_string(),
                context,
            )
            .building_on_previous(),
        ],

        WorkflowType::BugFixWorkflow => {
            let bug = context_str(&request.context, "bug_description").unwrap_or(description);
            vec![
                WorkflowStep::new(
                    "fix",
                    DEVELOPER,
                    format!("Analyze and fix the following bug: {bug}"),
                    context.clone(),
                ),
                WorkflowStep::new(
                    "verification",
                    REVIEWER,
                    "Review the bug fix for regressions and test coverage".to_string(),
                    context,
                )
                .building_on_previous(),
            ]
        }

        WorkflowType::RefactoringWorkflow => {
            let goals: Vec<&str> = request
                .context
                .get("refactor_goals")
                .and_then(Value::as_array)
                .map(|goals| goals.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();
            let refactor = if goals.is_empty() {
                format!("Refactor the code. Goals: {description}")
            } else {
                format!("Refactor the code to improve {}. Goals: {description}", goals.join(", "))
            };
            vec![
                WorkflowStep::new("refactoring", DEVELOPER, refactor, context.clone()),
                WorkflowStep::new(
                    "refactoring_review",
                    REVIEWER,
                    "Review the refactored code and confirm behavior is unchanged".to_string(),
                    context,
                )
                .building_on_previous(),
            ]
        }
    };
    Ok(steps)
}

fn context_str<'a>(context: &'a Payload, key: &str) -> Option<&'a str> {
    context
        .get(key)
        .and_then(Value::as_str)
        .filter(|value| !value.trim().is_empty())
}

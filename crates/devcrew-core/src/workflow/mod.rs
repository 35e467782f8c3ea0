//! Multi-step agent workflows coordinated over the message bus.

pub mod coordinator;
pub mod plan;

pub use coordinator::WorkflowCoordinator;
pub use plan::{plan, WorkflowStep};

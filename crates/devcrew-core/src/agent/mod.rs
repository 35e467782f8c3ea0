//! Agent runtime: task execution, history, metrics, and the bus bridge.

pub mod handler;
pub mod runtime;

pub use handler::{attach, AgentMessageHandler};
pub use runtime::{AgentRuntime, PlaceholderProcessor, TaskProcessor};

//! HTTP request handlers for the REST API and WebSocket bridge.

pub mod agent;
pub mod message;
pub mod system;
pub mod task;
pub mod workflow;
pub mod ws;

//! Shared domain types for devcrew.
//!
//! This crate contains the data shapes exchanged across the platform: the
//! message bus envelope, channel naming, the bus error taxonomy, settings,
//! agent task bookkeeping types, and workflow records.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod agent;
pub mod config;
pub mod error;
pub mod message;
pub mod workflow;

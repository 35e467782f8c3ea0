//! Message bus, agent runtime and workflow coordination for devcrew.
//!
//! This crate owns the bus semantics and the `BrokerTransport` port that the
//! infrastructure layer implements for Redis. It depends only on
//! `devcrew-types`, never on `devcrew-infra`.

pub mod agent;
pub mod message;
pub mod workflow;

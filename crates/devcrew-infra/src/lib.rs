//! Infrastructure layer for devcrew.
//!
//! Implements the `BrokerTransport` port from `devcrew-core` on Redis and
//! loads settings from TOML plus environment overrides.

pub mod config;
pub mod redis_transport;

pub use redis_transport::RedisTransport;

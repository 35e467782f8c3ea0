//! Logging and trace export setup shared by devcrew binaries.

pub mod tracing_setup;

pub use tracing_setup::{filter_for, init_tracing, shutdown_tracing, TracingOptions};

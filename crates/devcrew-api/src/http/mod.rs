//! HTTP/WebSocket API layer for devcrew.
//!
//! Axum-based REST API at `/api/v1/` with envelope response format, CORS
//! support, and a WebSocket bridge onto the message bus at `/ws`.

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod response;
pub mod router;

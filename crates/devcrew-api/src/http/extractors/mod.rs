//! Request extractors shared by the HTTP handlers.

pub mod query;

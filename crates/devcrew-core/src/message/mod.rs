//! Agent message bus over a pluggable pub/sub transport.
//!
//! - `transport` -- `BrokerTransport` seam and the boxed `BoxTransport`
//! - `memory` -- process-local transport for tests and `serve --in-memory`
//! - `handler` -- `MessageHandler` trait and closure-backed handlers
//! - `registry` -- handler registry and channel subscription table
//! - `listener` -- one dispatch task per subscribed channel
//! - `correlator` -- request/response matching by correlation ID
//! - `bus` -- `MessageBus` facade tying the above together

pub mod bus;
pub mod correlator;
pub mod handler;
mod listener;
pub mod memory;
pub mod registry;
pub mod transport;

pub use bus::{BusStats, MessageBus};
pub use handler::{handler_fn, FnHandler, HandlerResult, MessageHandler, SharedHandler};
pub use memory::InMemoryTransport;
pub use transport::{BoxTransport, BrokerTransport, RawSubscription};

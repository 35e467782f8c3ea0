//! Request/response correlation over broadcast pub/sub.
//!
//! A request gets a fresh correlation ID and a single-use [`ResponseHandler`]
//! subscribed to the caller's private reply channel. The handler captures the
//! first envelope carrying that correlation ID. [`CorrelatorCleanup`] removes
//! the handler and its subscription on every exit path, including when the
//! waiting future is dropped.

use std::sync::{Mutex, PoisonError};

use devcrew_types::message::Envelope;
use tokio::sync::oneshot;
use tracing::debug;

use super::bus::MessageBus;
use super::handler::{HandlerResult, MessageHandler};

/// Single-use handler resolving one pending request.
pub struct ResponseHandler {
    handler_id: String,
    correlation_id: String,
    slot: Mutex<Option<oneshot::Sender<Envelope>>>,
}

impl ResponseHandler {
    /// Create the handler and the receiver that resolves when it captures a reply.
    pub fn new(correlation_id: &str) -> (Self, oneshot::Receiver<Envelope>) {
        let (tx, rx) = oneshot::channel();
        let handler = Self {
            handler_id: format!("response_handler_{correlation_id}"),
            correlation_id: correlation_id.to_string(),
            slot: Mutex::new(Some(tx)),
        };
        (handler, rx)
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }
}

impl MessageHandler for ResponseHandler {
    fn handler_id(&self) -> &str {
        &self.handler_id
    }

    async fn handle(&self, envelope: &Envelope) -> HandlerResult {
        if envelope.correlation_id.as_deref() != Some(self.correlation_id.as_str()) {
            return Ok(None);
        }
        let sender = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match sender {
            Some(tx) => {
                let _ = tx.send(envelope.clone());
            }
            None => {
                debug!(correlation_id = %self.correlation_id, "duplicate response ignored");
            }
        }
        Ok(None)
    }
}

/// Removes a correlator's handler and subscription.
///
/// Call [`run`](Self::run) on the normal path. If the guard is dropped
/// without running (the request future was cancelled), cleanup is spawned
/// onto the current runtime.
pub(crate) struct CorrelatorCleanup {
    bus: Option<MessageBus>,
    channel: String,
    handler_id: String,
}

impl CorrelatorCleanup {
    pub(crate) fn new(bus: MessageBus, channel: String, handler_id: String) -> Self {
        Self {
            bus: Some(bus),
            channel,
            handler_id,
        }
    }

    pub(crate) async fn run(mut self) {
        if let Some(bus) = self.bus.take() {
            release(bus, &self.channel, &self.handler_id).await;
        }
    }
}

impl Drop for CorrelatorCleanup {
    fn drop(&mut self) {
        let Some(bus) = self.bus.take() else {
            return;
        };
        let channel = std::mem::take(&mut self.channel);
        let handler_id = std::mem::take(&mut self.handler_id);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move { release(bus, &channel, &handler_id).await });
        }
    }
}

async fn release(bus: MessageBus, channel: &str, handler_id: &str) {
    bus.unsubscribe(channel, handler_id).await;
    bus.unregister_handler(handler_id).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use devcrew_types::message::{MessageType, Payload};

    #[tokio::test]
    async fn captures_only_matching_correlation() {
        let (handler, mut rx) = ResponseHandler::new("req_1");
        assert_eq!(handler.handler_id(), "response_handler_req_1");

        let other = Envelope::new(MessageType::TaskResponse, "r", Payload::new())
            .with_correlation_id("req_2");
        handler.handle(&other).await.unwrap();
        assert!(rx.try_recv().is_err());

        let matching = Envelope::new(MessageType::TaskResponse, "r", Payload::new())
            .with_correlation_id("req_1");
        handler.handle(&matching).await.unwrap();
        assert_eq!(rx.await.unwrap().id, matching.id);
    }

    #[tokio::test]
    async fn second_match_is_ignored() {
        let (handler, _rx) = ResponseHandler::new("req_1");
        let env = Envelope::new(MessageType::TaskResponse, "r", Payload::new())
            .with_correlation_id("req_1");
        assert!(handler.handle(&env).await.unwrap().is_none());
        assert!(handler.handle(&env).await.unwrap().is_none());
    }
}

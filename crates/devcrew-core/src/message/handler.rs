//! Message handler trait for pluggable bus consumers.
//!
//! Handlers are registered with the bus by `handler_id` and become active once
//! subscribed to at least one channel. A handler may answer an envelope with
//! exactly one response, which the bus routes to the sender's reply channel.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use devcrew_types::error::HandlerError;
use devcrew_types::message::Envelope;

/// Result of processing one envelope.
pub type HandlerResult = Result<Option<Envelope>, HandlerError>;

/// Trait for processing envelopes delivered by the bus.
///
/// Uses native async fn in traits; [`MessageHandlerDyn`] provides the
/// object-safe form the registry stores.
pub trait MessageHandler: Send + Sync + 'static {
    /// Unique identity within a bus.
    fn handler_id(&self) -> &str;

    /// Process an incoming envelope.
    ///
    /// Returns `Ok(Some(response))` to reply to the envelope's sender, or
    /// `Ok(None)` when the envelope is consumed silently.
    fn handle(&self, envelope: &Envelope) -> impl Future<Output = HandlerResult> + Send;
}

/// Object-safe version of [`MessageHandler`] with boxed futures.
pub trait MessageHandlerDyn: Send + Sync {
    fn handler_id(&self) -> &str;

    fn handle_boxed<'a>(
        &'a self,
        envelope: &'a Envelope,
    ) -> Pin<Box<dyn Future<Output = HandlerResult> + Send + 'a>>;
}

impl<T: MessageHandler> MessageHandlerDyn for T {
    fn handler_id(&self) -> &str {
        MessageHandler::handler_id(self)
    }

    fn handle_boxed<'a>(
        &'a self,
        envelope: &'a Envelope,
    ) -> Pin<Box<dyn Future<Output = HandlerResult> + Send + 'a>> {
        Box::pin(self.handle(envelope))
    }
}

/// Shared, type-erased handler as stored in the registry.
pub type SharedHandler = Arc<dyn MessageHandlerDyn>;

/// Handler built from an async closure.
///
/// Convenient for bridges (WebSocket forwarding, CLI listeners) that have no
/// state beyond what the closure captures.
pub struct FnHandler<F> {
    handler_id: String,
    f: F,
}

/// Build a [`FnHandler`] from an id and an async closure taking an owned envelope.
pub fn handler_fn<F, Fut>(handler_id: impl Into<String>, f: F) -> FnHandler<F>
where
    F: Fn(Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    FnHandler {
        handler_id: handler_id.into(),
        f,
    }
}

impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn handler_id(&self) -> &str {
        &self.handler_id
    }

    fn handle(&self, envelope: &Envelope) -> impl Future<Output = HandlerResult> + Send {
        (self.f)(envelope.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devcrew_types::message::{MessageType, Payload};

    #[tokio::test]
    async fn fn_handler_invokes_closure() {
        let h = handler_fn("echo", |env: Envelope| async move {
            Ok(Some(Envelope::reply_to(
                &env,
                "echo",
                MessageType::TaskResponse,
                env.payload.clone(),
            )))
        });
        let shared: SharedHandler = Arc::new(h);
        assert_eq!(shared.handler_id(), "echo");

        let req = Envelope::new(MessageType::TaskRequest, "dev", Payload::new())
            .with_correlation_id("req_1");
        let reply = shared.handle_boxed(&req).await.unwrap().unwrap();
        assert_eq!(reply.correlation_id.as_deref(), Some("req_1"));
        assert_eq!(reply.recipient_id.as_deref(), Some("dev"));
    }
}

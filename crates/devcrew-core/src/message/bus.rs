//! Pub/sub message bus for agent-to-agent communication.
//!
//! The bus wraps a [`BoxTransport`] and adds:
//! - a handler registry keyed by handler id
//! - a subscription table mapping channels to handler ids
//! - one listener task per channel with at least one subscribed handler
//! - request/response correlation on top of fire-and-forget publish
//!
//! `MessageBus` is cheap to clone; clones share all state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use devcrew_types::error::BusError;
use devcrew_types::message::{
    new_correlation_id, response_channel, Envelope, MessageType, Payload, DEFAULT_PRIORITY,
};
use futures_util::future::join_all;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, error, info, warn};

use super::correlator::{CorrelatorCleanup, ResponseHandler};
use super::handler::{MessageHandler, SharedHandler};
use super::listener::ChannelListener;
use super::registry::{HandlerRegistry, Removal, SubscriptionTable};
use super::transport::BoxTransport;

/// State shared between the bus facade and its channel listeners.
pub(crate) struct BusShared {
    pub(crate) transport: BoxTransport,
    pub(crate) registry: HandlerRegistry,
    pub(crate) subscriptions: SubscriptionTable,
}

impl BusShared {
    /// Encode and publish one envelope, returning the subscriber count.
    pub(crate) async fn publish(&self, channel: &str, envelope: &Envelope) -> Result<usize, BusError> {
        if !self.transport.is_connected() {
            return Err(BusError::NotConnected);
        }
        let payload = envelope.encode().map_err(|e| BusError::Encode(e.to_string()))?;
        let count = self.transport.publish(channel, payload).await?;
        debug!(
            %channel,
            message_id = %envelope.id,
            message_type = %envelope.message_type,
            count,
            "published message"
        );
        Ok(count)
    }
}

/// Point-in-time view of bus state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusStats {
    pub transport: String,
    pub connected: bool,
    pub handlers: usize,
    pub subscriptions: usize,
    pub listeners: usize,
    pub channels: Vec<String>,
}

/// Handle to the message bus.
#[derive(Clone)]
pub struct MessageBus {
    shared: Arc<BusShared>,
    /// Channel name -> running listener. Held across subscribe/unsubscribe so
    /// listener start/stop and the subscription table change together.
    listeners: Arc<Mutex<HashMap<String, ChannelListener>>>,
}

impl MessageBus {
    /// Create a disconnected bus over `transport`.
    pub fn new(transport: BoxTransport) -> Self {
        Self {
            shared: Arc::new(BusShared {
                transport,
                registry: HandlerRegistry::new(),
                subscriptions: SubscriptionTable::new(),
            }),
            listeners: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn transport_name(&self) -> &str {
        self.shared.transport.name()
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Connect to the broker. A no-op when already connected.
    pub async fn connect(&self) -> Result<(), BusError> {
        if self.is_connected() {
            return Ok(());
        }
        if let Err(err) = self.shared.transport.connect().await {
            error!(transport = %self.transport_name(), error = %err, "failed to connect message bus");
            return Err(err);
        }
        info!(transport = %self.transport_name(), "message bus connected");
        Ok(())
    }

    /// Stop every listener, drop all subscriptions, and release the connection.
    ///
    /// Registered handlers are kept. Idempotent.
    ///
    /// The listener map stays locked until the transport is closed, so a
    /// concurrent `subscribe` either completes first and is torn down here,
    /// or observes the disconnected bus.
    pub async fn disconnect(&self) {
        let mut listeners = self.listeners.lock().await;
        let count = listeners.len();
        join_all(listeners.drain().map(|(_, listener)| listener.stop())).await;
        self.shared.subscriptions.clear();

        if self.is_connected() {
            self.shared.transport.disconnect().await;
            info!(listeners = count, "message bus disconnected");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.transport.is_connected()
    }

    fn ensure_connected(&self) -> Result<(), BusError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(BusError::NotConnected)
        }
    }

    // -----------------------------------------------------------------------
    // Publishing
    // -----------------------------------------------------------------------

    /// Publish an already-built envelope on an explicit channel.
    pub async fn publish(&self, channel: &str, envelope: &Envelope) -> Result<usize, BusError> {
        self.shared.publish(channel, envelope).await
    }

    /// Publish `envelope` on the channel derived from its recipient.
    ///
    /// Returns the message id.
    pub async fn send_envelope(&self, envelope: Envelope) -> Result<String, BusError> {
        self.ensure_connected()?;
        if !envelope.has_valid_priority() {
            return Err(BusError::InvalidPriority(envelope.priority));
        }
        let channel = envelope.channel();
        self.shared.publish(&channel, &envelope).await?;
        Ok(envelope.id)
    }

    /// Build and publish a message. `recipient_id = None` broadcasts.
    ///
    /// Returns the id of the published message.
    pub async fn send(
        &self,
        sender_id: &str,
        recipient_id: Option<&str>,
        message_type: MessageType,
        payload: Payload,
        correlation_id: Option<String>,
        priority: u8,
    ) -> Result<String, BusError> {
        let mut envelope = Envelope::new(message_type, sender_id, payload)
            .with_recipient(recipient_id.map(str::to_string))
            .with_priority(priority);
        if let Some(correlation_id) = correlation_id {
            envelope = envelope.with_correlation_id(correlation_id);
        }
        self.send_envelope(envelope).await
    }

    /// Publish to the `broadcast` channel with default priority.
    pub async fn broadcast(
        &self,
        sender_id: &str,
        message_type: MessageType,
        payload: Payload,
    ) -> Result<String, BusError> {
        self.send(sender_id, None, message_type, payload, None, DEFAULT_PRIORITY)
            .await
    }

    /// Send a message to `recipient_id` and wait for the correlated reply.
    ///
    /// Returns `Ok(None)` when nothing arrives within `timeout`. The
    /// temporary reply handler and its subscription are removed on every
    /// exit path.
    pub async fn request_response(
        &self,
        sender_id: &str,
        recipient_id: &str,
        message_type: MessageType,
        payload: Payload,
        timeout: Duration,
    ) -> Result<Option<Envelope>, BusError> {
        self.ensure_connected()?;

        let correlation_id = new_correlation_id();
        let reply_channel = response_channel(sender_id);
        let (handler, response_rx) = ResponseHandler::new(&correlation_id);
        let handler_id = handler.handler_id().to_string();
        self.register_handler(handler);

        let cleanup = CorrelatorCleanup::new(self.clone(), reply_channel.clone(), handler_id.clone());
        let outcome = self
            .exchange(
                sender_id,
                recipient_id,
                message_type,
                payload,
                &correlation_id,
                &handler_id,
                response_rx,
                timeout,
            )
            .await;
        cleanup.run().await;
        outcome
    }

    /// Subscribe the reply handler, send the request, and wait for the reply.
    #[allow(clippy::too_many_arguments)]
    async fn exchange(
        &self,
        sender_id: &str,
        recipient_id: &str,
        message_type: MessageType,
        payload: Payload,
        correlation_id: &str,
        handler_id: &str,
        response_rx: oneshot::Receiver<Envelope>,
        timeout: Duration,
    ) -> Result<Option<Envelope>, BusError> {
        self.subscribe(&response_channel(sender_id), handler_id)
            .await?;
        self.send(
            sender_id,
            Some(recipient_id),
            message_type,
            payload,
            Some(correlation_id.to_string()),
            DEFAULT_PRIORITY,
        )
        .await?;

        match tokio::time::timeout(timeout, response_rx).await {
            Ok(Ok(response)) => Ok(Some(response)),
            Ok(Err(_)) => Ok(None),
            Err(_) => {
                warn!(
                    %correlation_id,
                    recipient = %recipient_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "request timed out waiting for response"
                );
                Ok(None)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Handlers and subscriptions
    // -----------------------------------------------------------------------

    /// Register a handler, replacing any existing one with the same id.
    pub fn register_handler<H: MessageHandler>(&self, handler: H) {
        self.register_shared(Arc::new(handler));
    }

    /// Register an already type-erased handler.
    pub fn register_shared(&self, handler: SharedHandler) {
        let handler_id = handler.handler_id().to_string();
        if self.shared.registry.insert(handler).is_some() {
            info!(%handler_id, "replaced existing message handler");
        } else {
            info!(%handler_id, "registered message handler");
        }
    }

    /// Unsubscribe a handler from every channel and remove it.
    ///
    /// Returns `false` if the id was unknown.
    pub async fn unregister_handler(&self, handler_id: &str) -> bool {
        let mut listeners = self.listeners.lock().await;
        for channel in self.shared.subscriptions.channels_of(handler_id) {
            self.unsubscribe_locked(&mut listeners, &channel, handler_id)
                .await;
        }
        let removed = self.shared.registry.remove(handler_id).is_some();
        if removed {
            info!(%handler_id, "unregistered message handler");
        }
        removed
    }

    /// Subscribe a registered handler to `channel`.
    ///
    /// The first subscriber on a channel opens the broker subscription and
    /// starts its listener before this returns.
    pub async fn subscribe(&self, channel: &str, handler_id: &str) -> Result<(), BusError> {
        let mut listeners = self.listeners.lock().await;
        // Checked under the lock: `disconnect` holds it until the transport is closed.
        self.ensure_connected()?;

        if !self.shared.registry.contains(handler_id) {
            return Err(BusError::NotRegistered(handler_id.to_string()));
        }

        let listener_alive = listeners
            .get(channel)
            .is_some_and(|listener| !listener.is_finished());
        if listener_alive && self.shared.subscriptions.is_subscribed(channel, handler_id) {
            debug!(%channel, %handler_id, "handler already subscribed");
            return Ok(());
        }

        if !listener_alive {
            if let Some(dead) = listeners.remove(channel) {
                warn!(%channel, "replacing exited channel listener");
                dead.stop().await;
            }
            let subscription = self.shared.transport.subscribe_raw(channel).await?;
            listeners.insert(
                channel.to_string(),
                ChannelListener::spawn(subscription, Arc::clone(&self.shared)),
            );
        }
        self.shared.subscriptions.add(channel, handler_id);
        info!(%channel, %handler_id, "subscribed handler to channel");
        Ok(())
    }

    /// Remove `handler_id` from `channel`.
    ///
    /// Stops the channel's listener when the last handler leaves. Returns
    /// `false` (and does nothing) if the handler was not subscribed.
    pub async fn unsubscribe(&self, channel: &str, handler_id: &str) -> bool {
        let mut listeners = self.listeners.lock().await;
        self.unsubscribe_locked(&mut listeners, channel, handler_id)
            .await
    }

    async fn unsubscribe_locked(
        &self,
        listeners: &mut HashMap<String, ChannelListener>,
        channel: &str,
        handler_id: &str,
    ) -> bool {
        match self.shared.subscriptions.remove(channel, handler_id) {
            Removal::NotSubscribed => false,
            Removal::Remaining(remaining) => {
                info!(%channel, %handler_id, remaining, "unsubscribed handler from channel");
                true
            }
            Removal::ChannelEmptied => {
                if let Some(listener) = listeners.remove(channel) {
                    listener.stop().await;
                }
                info!(%channel, %handler_id, "unsubscribed last handler, channel listener stopped");
                true
            }
        }
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    pub fn handler_count(&self) -> usize {
        self.shared.registry.len()
    }

    pub fn is_registered(&self, handler_id: &str) -> bool {
        self.shared.registry.contains(handler_id)
    }

    /// Total (channel, handler) subscription pairs.
    pub fn subscription_count(&self) -> usize {
        self.shared.subscriptions.subscription_count()
    }

    /// Channels with at least one subscribed handler, sorted.
    pub fn channels(&self) -> Vec<String> {
        self.shared.subscriptions.channels()
    }

    pub async fn listener_count(&self) -> usize {
        self.listeners.lock().await.len()
    }

    pub async fn stats(&self) -> BusStats {
        BusStats {
            transport: self.transport_name().to_string(),
            connected: self.is_connected(),
            handlers: self.handler_count(),
            subscriptions: self.subscription_count(),
            listeners: self.listener_count().await,
            channels: self.channels(),
        }
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("transport", &self.transport_name())
            .field("connected", &self.is_connected())
            .field("handlers", &self.handler_count())
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

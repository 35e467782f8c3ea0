//! Broker transport abstraction.
//!
//! Follows the same blanket-impl pattern as the other runtime-selected seams:
//! 1. `BrokerTransport` uses native async fn in traits (RPITIT)
//! 2. Object-safe `BrokerTransportDyn` is blanket-implemented for every transport
//! 3. `BoxTransport` wraps `Box<dyn BrokerTransportDyn>` and delegates
//!
//! A transport moves opaque string payloads. Envelope encoding lives in the bus.

use std::future::Future;
use std::pin::Pin;

use devcrew_types::error::BusError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::warn;

/// Buffer between a transport's receive pump and the channel listener.
pub const RAW_BUFFER: usize = 256;

/// Connection to a pub/sub store.
///
/// Delivery is at-least-once to every listener subscribed at publish time.
/// Nothing is retained for late subscribers.
pub trait BrokerTransport: Send + Sync {
    /// Short human-readable name ("redis", "in-memory").
    fn name(&self) -> &str;

    /// Establish the connection. Fails with [`BusError::Connection`].
    fn connect(&self) -> impl Future<Output = Result<(), BusError>> + Send;

    /// Release the connection. Idempotent.
    fn disconnect(&self) -> impl Future<Output = ()> + Send;

    fn is_connected(&self) -> bool;

    /// Publish a raw payload. Returns how many subscribers received it.
    fn publish(
        &self,
        channel: &str,
        payload: String,
    ) -> impl Future<Output = Result<usize, BusError>> + Send;

    /// Open a subscription yielding raw payloads for `channel`.
    ///
    /// The subscription is active once this returns.
    fn subscribe_raw(
        &self,
        channel: &str,
    ) -> impl Future<Output = Result<RawSubscription, BusError>> + Send;
}

/// A live, cancellable feed of raw payloads from one channel.
///
/// Payloads are pushed by a transport-owned pump task. [`close`](Self::close)
/// signals the pump to unsubscribe and waits for it; dropping without
/// closing still signals the pump but does not wait.
pub struct RawSubscription {
    channel: String,
    messages: mpsc::Receiver<String>,
    shutdown: Option<oneshot::Sender<()>>,
    pump: Option<JoinHandle<()>>,
}

impl RawSubscription {
    pub fn new(
        channel: impl Into<String>,
        messages: mpsc::Receiver<String>,
        shutdown: oneshot::Sender<()>,
        pump: JoinHandle<()>,
    ) -> Self {
        Self {
            channel: channel.into(),
            messages,
            shutdown: Some(shutdown),
            pump: Some(pump),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Next raw payload, or `None` once the pump has ended.
    pub async fn recv(&mut self) -> Option<String> {
        self.messages.recv().await
    }

    /// Unsubscribe from the broker and wait for the pump to finish.
    pub async fn close(mut self) {
        // Unblock a pump waiting on a full buffer.
        self.messages.close();
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(pump) = self.pump.take() {
            if let Err(err) = pump.await {
                warn!(channel = %self.channel, error = %err, "subscription pump ended abnormally");
            }
        }
    }
}

impl Drop for RawSubscription {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

impl std::fmt::Debug for RawSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawSubscription")
            .field("channel", &self.channel)
            .finish()
    }
}

/// Object-safe version of [`BrokerTransport`] with boxed futures.
///
/// A blanket implementation is provided for all types implementing `BrokerTransport`.
pub trait BrokerTransportDyn: Send + Sync {
    fn name(&self) -> &str;

    fn connect_boxed(&self) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>>;

    fn disconnect_boxed(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    fn is_connected(&self) -> bool;

    fn publish_boxed<'a>(
        &'a self,
        channel: &'a str,
        payload: String,
    ) -> Pin<Box<dyn Future<Output = Result<usize, BusError>> + Send + 'a>>;

    fn subscribe_raw_boxed<'a>(
        &'a self,
        channel: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<RawSubscription, BusError>> + Send + 'a>>;
}

impl<T: BrokerTransport> BrokerTransportDyn for T {
    fn name(&self) -> &str {
        BrokerTransport::name(self)
    }

    fn connect_boxed(&self) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>> {
        Box::pin(self.connect())
    }

    fn disconnect_boxed(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(self.disconnect())
    }

    fn is_connected(&self) -> bool {
        BrokerTransport::is_connected(self)
    }

    fn publish_boxed<'a>(
        &'a self,
        channel: &'a str,
        payload: String,
    ) -> Pin<Box<dyn Future<Output = Result<usize, BusError>> + Send + 'a>> {
        Box::pin(self.publish(channel, payload))
    }

    fn subscribe_raw_boxed<'a>(
        &'a self,
        channel: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<RawSubscription, BusError>> + Send + 'a>> {
        Box::pin(self.subscribe_raw(channel))
    }
}

/// Type-erased broker transport, selected at startup (Redis vs in-memory).
pub struct BoxTransport {
    inner: Box<dyn BrokerTransportDyn + Send + Sync>,
}

impl BoxTransport {
    pub fn new<T: BrokerTransport + 'static>(transport: T) -> Self {
        Self {
            inner: Box::new(transport),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub async fn connect(&self) -> Result<(), BusError> {
        self.inner.connect_boxed().await
    }

    pub async fn disconnect(&self) {
        self.inner.disconnect_boxed().await
    }

    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    pub async fn publish(&self, channel: &str, payload: String) -> Result<usize, BusError> {
        self.inner.publish_boxed(channel, payload).await
    }

    pub async fn subscribe_raw(&self, channel: &str) -> Result<RawSubscription, BusError> {
        self.inner.subscribe_raw_boxed(channel).await
    }
}

impl std::fmt::Debug for BoxTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxTransport")
            .field("name", &self.name())
            .field("connected", &self.is_connected())
            .finish()
    }
}

//! Process-local broker transport.
//!
//! Each channel is a tokio `broadcast` channel created on first use. Publishing
//! reports the number of live receivers, so a channel without subscribers
//! yields 0 exactly like an idle Redis channel. Used by tests and by
//! `devcrew serve --in-memory`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use devcrew_types::error::BusError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use super::transport::{BrokerTransport, RawSubscription, RAW_BUFFER};

/// Buffer size for per-channel broadcast senders.
const BROADCAST_BUFFER: usize = 1024;

/// In-process pub/sub broker.
pub struct InMemoryTransport {
    channels: Arc<DashMap<String, broadcast::Sender<String>>>,
    connected: AtomicBool,
    /// When set, `connect` fails with this reason.
    refuse_connect: Option<String>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            connected: AtomicBool::new(false),
            refuse_connect: None,
        }
    }

    /// A transport whose `connect` always fails, simulating an unreachable broker.
    pub fn unreachable(reason: impl Into<String>) -> Self {
        Self {
            refuse_connect: Some(reason.into()),
            ..Self::new()
        }
    }

    /// Number of live receivers on `channel`.
    pub fn receiver_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Number of channels with a live broadcast sender.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    fn ensure_connected(&self) -> Result<(), BusError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BusError::NotConnected)
        }
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerTransport for InMemoryTransport {
    fn name(&self) -> &str {
        "in-memory"
    }

    async fn connect(&self) -> Result<(), BusError> {
        if let Some(reason) = &self.refuse_connect {
            return Err(BusError::Connection(reason.clone()));
        }
        self.connected.store(true, Ordering::SeqCst);
        info!("in-memory broker connected");
        Ok(())
    }

    async fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            // Dropping the senders ends every remaining pump.
            self.channels.clear();
            info!("in-memory broker disconnected");
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn publish(&self, channel: &str, payload: String) -> Result<usize, BusError> {
        self.ensure_connected()?;
        let Some(sender) = self.channels.get(channel) else {
            debug!(%channel, "channel has never been subscribed, message dropped");
            return Ok(0);
        };
        match sender.send(payload) {
            Ok(count) => Ok(count),
            Err(_) => {
                debug!(%channel, "no active subscribers on channel");
                Ok(0)
            }
        }
    }

    async fn subscribe_raw(&self, channel: &str) -> Result<RawSubscription, BusError> {
        self.ensure_connected()?;

        let mut rx = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(BROADCAST_BUFFER).0)
            .subscribe();

        let (tx, messages) = mpsc::channel(RAW_BUFFER);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let name = channel.to_string();
        let channels = Arc::clone(&self.channels);

        let pump = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => break,
                    received = rx.recv() => match received {
                        Ok(payload) => {
                            if tx.send(payload).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(channel = %name, skipped = n, "in-memory subscriber lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            // Dropping `rx` is the unsubscribe; the last one out removes the channel.
            drop(rx);
            channels.remove_if(&name, |_, sender| sender.receiver_count() == 0);
            debug!(channel = %name, "in-memory subscription closed");
        });

        Ok(RawSubscription::new(channel, messages, shutdown_tx, pump))
    }
}

impl std::fmt::Debug for InMemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTransport")
            .field("channels", &self.channels.len())
            .field("connected", &self.is_connected())
            .finish()
    }
}

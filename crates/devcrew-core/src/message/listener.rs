//! Per-channel listener tasks.
//!
//! One listener runs for each channel with at least one subscribed handler.
//! It pulls raw payloads from the transport, decodes them, and fans each
//! envelope out to the handlers subscribed at dispatch time. The next payload
//! is not read until every handler invocation for the current one has
//! finished, so each channel has at most one message in flight.

use std::sync::Arc;

use devcrew_types::error::{DecodeError, HandlerError};
use devcrew_types::message::{response_channel, Envelope};
use futures_util::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::bus::BusShared;
use super::handler::SharedHandler;
use super::transport::RawSubscription;

/// Handle to a running channel listener.
pub(crate) struct ChannelListener {
    channel: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ChannelListener {
    /// Start listening on an already-established subscription.
    pub(crate) fn spawn(subscription: RawSubscription, shared: Arc<BusShared>) -> Self {
        let channel = subscription.channel().to_string();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(subscription, shared, cancel.clone()));
        Self {
            channel,
            cancel,
            task,
        }
    }

    /// Whether the listener task has exited, e.g. because the broker ended
    /// its subscription.
    pub(crate) fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel the listener and wait until it has unsubscribed and exited.
    pub(crate) async fn stop(self) {
        self.cancel.cancel();
        if let Err(err) = self.task.await {
            warn!(channel = %self.channel, error = %err, "channel listener ended abnormally");
        }
    }
}

async fn run(mut subscription: RawSubscription, shared: Arc<BusShared>, cancel: CancellationToken) {
    let channel = subscription.channel().to_string();
    info!(%channel, "started listening to channel");

    loop {
        let raw = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            raw = subscription.recv() => raw,
        };

        let Some(raw) = raw else {
            error!(%channel, "broker subscription ended unexpectedly");
            break;
        };

        let envelope = match decode(&channel, &raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                error!(%channel, error = %err, "dropping malformed message");
                continue;
            }
        };

        // Cancellation abandons the in-flight fan-out; spawned handler
        // invocations run to completion on their own.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = dispatch(&shared, &channel, envelope) => {}
        }
    }

    subscription.close().await;
    info!(%channel, "channel listener stopped");
}

fn decode(channel: &str, raw: &str) -> Result<Envelope, DecodeError> {
    Envelope::decode(raw).map_err(|e| DecodeError {
        channel: channel.to_string(),
        reason: e.to_string(),
    })
}

/// Deliver `envelope` to every handler currently subscribed to `channel`.
///
/// Returns the number of handlers invoked.
pub(crate) async fn dispatch(shared: &Arc<BusShared>, channel: &str, envelope: Envelope) -> usize {
    let handlers: Vec<SharedHandler> = shared
        .subscriptions
        .handlers_for(channel)
        .iter()
        .filter_map(|id| shared.registry.get(id))
        .collect();

    if handlers.is_empty() {
        debug!(%channel, message_id = %envelope.id, "no handlers subscribed at dispatch time");
        return 0;
    }

    let envelope = Arc::new(envelope);
    let invocations: Vec<(String, JoinHandle<()>)> = handlers
        .into_iter()
        .map(|handler| {
            let handler_id = handler.handler_id().to_string();
            let task = tokio::spawn(invoke(Arc::clone(shared), handler, Arc::clone(&envelope)));
            (handler_id, task)
        })
        .collect();

    let count = invocations.len();
    let (ids, tasks): (Vec<String>, Vec<JoinHandle<()>>) = invocations.into_iter().unzip();
    for (handler_id, joined) in ids.iter().zip(join_all(tasks).await) {
        if let Err(err) = joined {
            let err = HandlerError::Panicked(err.to_string());
            error!(%handler_id, message_id = %envelope.id, error = %err, "handler failed to process message");
        }
    }
    count
}

/// Run one handler in isolation and route its response, if any.
async fn invoke(shared: Arc<BusShared>, handler: SharedHandler, envelope: Arc<Envelope>) {
    let handler_id = handler.handler_id();
    match handler.handle_boxed(&envelope).await {
        Ok(None) => {}
        Ok(Some(response)) => {
            if envelope.sender_id.is_empty() {
                debug!(%handler_id, message_id = %envelope.id, "response discarded, message has no sender");
                return;
            }
            let reply_channel = response_channel(&envelope.sender_id);
            if let Err(err) = shared.publish(&reply_channel, &response).await {
                warn!(
                    %handler_id,
                    channel = %reply_channel,
                    error = %err,
                    "failed to publish handler response"
                );
            }
        }
        Err(err) => {
            error!(%handler_id, message_id = %envelope.id, error = %err, "handler failed to process message");
        }
    }
}

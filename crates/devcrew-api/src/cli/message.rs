//! One-shot bus client commands: send, broadcast, request, listen.

use std::time::Duration;

use anyhow::{Context, Result};
use console::style;
use tokio::sync::mpsc;

use devcrew_core::message::{handler_fn, BoxTransport, MessageBus};
use devcrew_infra::RedisTransport;
use devcrew_types::config::Settings;
use devcrew_types::message::{channel_for, into_payload, Envelope, MessageType, Payload};

/// Envelopes buffered by `listen` before new ones are dropped.
const LISTEN_BUFFER: usize = 256;

/// Connect a bus over the configured Redis broker.
pub async fn connect_bus(settings: &Settings) -> Result<MessageBus> {
    let transport = RedisTransport::new(&settings.redis)?;
    let bus = MessageBus::new(BoxTransport::new(transport));
    bus.connect()
        .await
        .with_context(|| format!("could not reach broker for {}", settings.app.name))?;
    Ok(bus)
}

/// Parse a JSON payload argument.
pub fn parse_payload(raw: &str) -> Result<Payload> {
    let value: serde_json::Value =
        serde_json::from_str(raw).with_context(|| format!("payload is not valid JSON: {raw}"))?;
    Ok(into_payload(value))
}

#[allow(clippy::too_many_arguments)]
pub async fn send(
    settings: &Settings,
    from: &str,
    to: Option<&str>,
    message_type: MessageType,
    payload: &str,
    priority: u8,
    correlation_id: Option<String>,
    json: bool,
) -> Result<()> {
    let payload = parse_payload(payload)?;
    let bus = connect_bus(settings).await?;
    let outcome = bus
        .send(from, to, message_type, payload, correlation_id, priority)
        .await;
    bus.disconnect().await;
    let message_id = outcome?;

    print_sent(&message_id, &channel_for(to), json)
}

pub async fn broadcast(
    settings: &Settings,
    from: &str,
    message_type: MessageType,
    payload: &str,
    json: bool,
) -> Result<()> {
    let payload = parse_payload(payload)?;
    let bus = connect_bus(settings).await?;
    let outcome = bus.broadcast(from, message_type, payload).await;
    bus.disconnect().await;
    let message_id = outcome?;

    print_sent(&message_id, &channel_for(None), json)
}

pub async fn request(
    settings: &Settings,
    from: &str,
    to: &str,
    message_type: MessageType,
    payload: &str,
    timeout: Option<u64>,
    json: bool,
) -> Result<()> {
    let payload = parse_payload(payload)?;
    let timeout = Duration::from_secs(timeout.unwrap_or(settings.agents.request_timeout_secs));
    let bus = connect_bus(settings).await?;
    let outcome = bus
        .request_response(from, to, message_type, payload, timeout)
        .await;
    bus.disconnect().await;

    match outcome? {
        Some(reply) => print_envelope(&reply, json),
        None if json => {
            println!("{}", serde_json::json!({ "timed_out": true, "response": null }));
            Ok(())
        }
        None => {
            eprintln!(
                "  {} No reply from '{}' within {}s",
                style("⏱").yellow(),
                style(to).cyan(),
                timeout.as_secs()
            );
            Ok(())
        }
    }
}

/// Subscribe a printing handler to `channels` until `count` envelopes
/// arrive or Ctrl+C.
pub async fn listen(
    settings: &Settings,
    channels: &[String],
    count: Option<usize>,
    json: bool,
) -> Result<()> {
    let bus = connect_bus(settings).await?;
    let handler_id = format!("cli_listen_{}", uuid::Uuid::now_v7().simple());

    let (tx, mut rx) = mpsc::channel::<Envelope>(LISTEN_BUFFER);
    bus.register_handler(handler_fn(handler_id.clone(), move |envelope: Envelope| {
        let tx = tx.clone();
        async move {
            if tx.try_send(envelope).is_err() {
                tracing::warn!("listen buffer full, dropping envelope");
            }
            Ok(None)
        }
    }));
    for channel in channels {
        bus.subscribe(channel, &handler_id).await?;
    }

    if !json {
        println!(
            "  {} Listening on {}",
            style("👂").bold(),
            style(channels.join(", ")).cyan()
        );
        println!("  {}", style("Press Ctrl+C to stop").dim());
    }

    let mut received = 0usize;
    let result = loop {
        if count.is_some_and(|limit| received >= limit) {
            break Ok(());
        }
        tokio::select! {
            envelope = rx.recv() => match envelope {
                Some(envelope) => {
                    received += 1;
                    if let Err(err) = print_envelope(&envelope, json) {
                        break Err(err);
                    }
                }
                None => break Ok(()),
            },
            _ = tokio::signal::ctrl_c() => break Ok(()),
        }
    };

    bus.unregister_handler(&handler_id).await;
    bus.disconnect().await;
    result
}

fn print_sent(message_id: &str, channel: &str, json: bool) -> Result<()> {
    if json {
        let out = serde_json::json!({ "message_id": message_id, "channel": channel });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!(
            "  {} Sent {} on {}",
            style("✓").green(),
            style(message_id).bold(),
            style(channel).cyan()
        );
    }
    Ok(())
}

fn print_envelope(envelope: &Envelope, json: bool) -> Result<()> {
    if json {
        println!("{}", envelope.encode()?);
        return Ok(());
    }
    println!(
        "  {} {} {} -> {}",
        style(envelope.timestamp.format("%H:%M:%S")).dim(),
        style(envelope.message_type).magenta(),
        style(&envelope.sender_id).bold(),
        style(envelope.recipient_id.as_deref().unwrap_or("*")).cyan(),
    );
    if let Some(correlation_id) = &envelope.correlation_id {
        println!("    {} {}", style("correlation").dim(), correlation_id);
    }
    println!(
        "    {}",
        serde_json::to_string_pretty(&envelope.payload)?.replace('\n', "\n    ")
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_payload_is_used_as_is() {
        let payload = parse_payload(r#"{"task_id":"t-1","progress":50}"#).unwrap();
        assert_eq!(payload["task_id"], "t-1");
        assert_eq!(payload["progress"], 50);
    }

    #[test]
    fn scalar_payload_is_wrapped() {
        let payload = parse_payload("42").unwrap();
        assert_eq!(payload["value"], 42);
    }

    #[test]
    fn invalid_payload_is_an_error() {
        assert!(parse_payload("{not json").is_err());
    }

    #[test]
    fn envelope_prints_in_both_modes() {
        let envelope = Envelope::new(MessageType::TaskUpdate, "developer", Payload::new())
            .with_correlation_id("req_1");
        print_envelope(&envelope, true).unwrap();
        print_envelope(&envelope, false).unwrap();
    }
}

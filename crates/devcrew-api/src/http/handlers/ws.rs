//! WebSocket bridge between browser clients and the message bus.
//!
//! The `/ws` endpoint upgrades an HTTP connection to a WebSocket. Each
//! connection registers its own bus handler (`ws_<uuid>`) and the client
//! chooses which bus channels that handler is subscribed to:
//!
//! - **Forwards envelopes:** every envelope delivered to the connection's
//!   handler is pushed as a `{"type":"bus_message","envelope":{..}}` frame.
//! - **Receives commands:** `subscribe`, `unsubscribe`, `ping` and
//!   `get_status`, JSON encoded and tagged by `type`.
//!
//! Forwarding goes through a bounded queue filled with `try_send`, so a slow
//! client loses frames instead of stalling the bus listener that delivered
//! them. The handler is unregistered when the socket closes, which also
//! removes all of its subscriptions.

use std::collections::BTreeSet;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use uuid::Uuid;

use devcrew_core::message::handler_fn;
use devcrew_types::message::{agent_channel, Envelope, BROADCAST_CHANNEL};

use crate::http::handlers::agent::bus_state;
use crate::state::AppState;

/// Envelopes buffered per connection before frames are dropped.
const FORWARD_BUFFER: usize = 64;

/// Incoming command from a WebSocket client.
#[derive(Debug, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsCommand {
    Subscribe {
        #[serde(default)]
        channels: Vec<String>,
    },
    Unsubscribe {
        #[serde(default)]
        channels: Vec<String>,
    },
    /// Keep-alive. Server responds with `{"type":"pong"}`.
    Ping,
    GetStatus,
}

/// Upgrade an HTTP request to a bus-bridging WebSocket. Mounted at `/ws`.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

/// Per-connection bus handler plus the channels the client asked for.
struct Connection {
    handler_id: String,
    channels: BTreeSet<String>,
}

async fn handle_ws_connection(socket: WebSocket, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let handler_id = format!("ws_{}", Uuid::now_v7().simple());
    let (forward_tx, mut forward_rx) = mpsc::channel::<Envelope>(FORWARD_BUFFER);
    let forward_id = handler_id.clone();
    state.bus.register_handler(handler_fn(handler_id.clone(), move |envelope: Envelope| {
        let forward_tx = forward_tx.clone();
        let forward_id = forward_id.clone();
        async move {
            if let Err(err) = forward_tx.try_send(envelope) {
                tracing::warn!(handler_id = %forward_id, error = %err, "dropping frame for slow WebSocket client");
            }
            Ok(None)
        }
    }));
    tracing::debug!(%handler_id, "WebSocket connection opened");

    let mut conn = Connection {
        handler_id,
        channels: BTreeSet::new(),
    };

    if send_json(&mut ws_sender, &welcome_frame(&state)).await.is_err() {
        state.bus.unregister_handler(&conn.handler_id).await;
        return;
    }

    loop {
        tokio::select! {
            Some(envelope) = forward_rx.recv() => {
                let frame = json!({ "type": "bus_message", "envelope": envelope });
                if send_json(&mut ws_sender, &frame).await.is_err() {
                    break;
                }
            }

            msg_result = ws_receiver.next() => {
                match msg_result {
                    Some(Ok(Message::Text(text))) => {
                        let reply = process_command(&text, &state, &mut conn).await;
                        if send_json(&mut ws_sender, &reply).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        tracing::debug!("WebSocket receive error: {err}");
                        break;
                    }
                    // Binary and protocol-level ping/pong frames.
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.bus.unregister_handler(&conn.handler_id).await;
    tracing::debug!(handler_id = %conn.handler_id, "WebSocket connection closed");
}

/// Parse and apply one client command, returning the frame to send back.
async fn process_command(text: &str, state: &AppState, conn: &mut Connection) -> Value {
    let cmd: WsCommand = match serde_json::from_str(text) {
        Ok(cmd) => cmd,
        Err(err) => {
            tracing::warn!(raw = %text, error = %err, "Ignoring malformed WebSocket command");
            return error_frame(&format!("Invalid command: {err}"));
        }
    };

    match cmd {
        WsCommand::Subscribe { channels } => {
            let mut subscribed = Vec::new();
            let mut failures = Vec::new();
            for channel in channels {
                match state.bus.subscribe(&channel, &conn.handler_id).await {
                    Ok(()) => {
                        conn.channels.insert(channel.clone());
                        subscribed.push(channel);
                    }
                    Err(err) => failures.push(json!({ "channel": channel, "error": err.to_string() })),
                }
            }
            json!({
                "type": "subscription",
                "status": "subscribed",
                "channels": subscribed,
                "errors": failures,
                "timestamp": Utc::now().to_rfc3339(),
            })
        }
        WsCommand::Unsubscribe { channels } => {
            for channel in &channels {
                state.bus.unsubscribe(channel, &conn.handler_id).await;
                conn.channels.remove(channel);
            }
            json!({
                "type": "subscription",
                "status": "unsubscribed",
                "channels": channels,
                "timestamp": Utc::now().to_rfc3339(),
            })
        }
        WsCommand::Ping => json!({ "type": "pong", "timestamp": Utc::now().to_rfc3339() }),
        WsCommand::GetStatus => status_frame(state, conn),
    }
}

fn welcome_frame(state: &AppState) -> Value {
    let mut available = vec![BROADCAST_CHANNEL.to_string()];
    available.extend(state.agents.keys().map(|id| agent_channel(id)));
    json!({
        "type": "connection",
        "status": "connected",
        "message": format!("Connected to {}", state.settings.app.name),
        "available_channels": available,
        "timestamp": Utc::now().to_rfc3339(),
    })
}

fn status_frame(state: &AppState, conn: &Connection) -> Value {
    let agents: serde_json::Map<String, Value> = state
        .agents
        .iter()
        .map(|(agent_id, runtime)| {
            let status = runtime.status();
            let summary = json!({
                "status": status.status,
                "current_tasks": status.current_tasks,
                "success_rate": status.metrics.success_rate,
            });
            (agent_id.clone(), summary)
        })
        .collect();
    let total_completed: u64 = state
        .agents
        .values()
        .map(|runtime| runtime.metrics().tasks_completed)
        .sum();

    json!({
        "type": "system_status",
        "agents": agents,
        "system": {
            "message_bus": bus_state(state),
            "total_tasks_completed": total_completed,
        },
        "subscriptions": conn.channels,
        "timestamp": Utc::now().to_rfc3339(),
    })
}

fn error_frame(message: &str) -> Value {
    json!({ "type": "error", "message": message, "timestamp": Utc::now().to_rfc3339() })
}

async fn send_json(
    ws_sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    frame: &Value,
) -> Result<(), axum::Error> {
    ws_sender.send(Message::Text(frame.to_string().into())).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use devcrew_core::message::{BoxTransport, InMemoryTransport};
    use devcrew_types::config::Settings;

    fn conn() -> Connection {
        Connection {
            handler_id: "ws_test".to_string(),
            channels: BTreeSet::new(),
        }
    }

    async fn state_with_handler() -> AppState {
        let state = AppState::new(Settings::default(), BoxTransport::new(InMemoryTransport::new()));
        state.bus.connect().await.unwrap();
        state
            .bus
            .register_handler(handler_fn("ws_test", |_env: Envelope| async { Ok(None) }));
        state
    }

    #[test]
    fn welcome_lists_broadcast_and_agent_channels() {
        let state = AppState::new(Settings::default(), BoxTransport::new(InMemoryTransport::new()));
        let frame = welcome_frame(&state);
        assert_eq!(frame["type"], "connection");
        let channels: Vec<&str> = frame["available_channels"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert_eq!(channels, vec!["broadcast", "agent_developer", "agent_reviewer"]);
    }

    #[tokio::test]
    async fn subscribe_and_unsubscribe_commands() {
        let state = state_with_handler().await;
        let mut conn = conn();

        let reply = process_command(
            r#"{"type":"subscribe","channels":["broadcast","agent_developer"]}"#,
            &state,
            &mut conn,
        )
        .await;
        assert_eq!(reply["type"], "subscription");
        assert_eq!(reply["status"], "subscribed");
        assert_eq!(conn.channels.len(), 2);
        assert_eq!(state.bus.subscription_count(), 2);

        let reply = process_command(
            r#"{"type":"unsubscribe","channels":["broadcast"]}"#,
            &state,
            &mut conn,
        )
        .await;
        assert_eq!(reply["status"], "unsubscribed");
        assert_eq!(state.bus.channels(), vec!["agent_developer".to_string()]);
    }

    #[tokio::test]
    async fn ping_and_status_commands() {
        let state = state_with_handler().await;
        let mut conn = conn();

        let pong = process_command(r#"{"type":"ping"}"#, &state, &mut conn).await;
        assert_eq!(pong["type"], "pong");

        let status = process_command(r#"{"type":"get_status"}"#, &state, &mut conn).await;
        assert_eq!(status["type"], "system_status");
        assert_eq!(status["system"]["message_bus"], "connected");
        assert!(status["agents"].get("developer").is_some());
    }

    #[tokio::test]
    async fn malformed_and_unknown_commands_yield_error_frames() {
        let state = state_with_handler().await;
        let mut conn = conn();

        let reply = process_command("not json", &state, &mut conn).await;
        assert_eq!(reply["type"], "error");

        let reply = process_command(r#"{"type":"launch"}"#, &state, &mut conn).await;
        assert_eq!(reply["type"], "error");
    }

    #[tokio::test]
    async fn subscribe_when_disconnected_reports_errors() {
        let state = state_with_handler().await;
        state.bus.disconnect().await;
        let mut conn = conn();

        let reply = process_command(
            r#"{"type":"subscribe","channels":["broadcast"]}"#,
            &state,
            &mut conn,
        )
        .await;
        assert_eq!(reply["channels"].as_array().unwrap().len(), 0);
        assert_eq!(reply["errors"].as_array().unwrap().len(), 1);
        assert!(conn.channels.is_empty());
    }
}

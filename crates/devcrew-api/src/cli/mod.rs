//! CLI command definitions for the `devcrew` binary.
//!
//! Uses clap derive macros for argument parsing. `serve` hosts the agents
//! and the HTTP API; the other commands are one-shot bus clients.

pub mod config;
pub mod message;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

use devcrew_types::message::{MessageType, DEFAULT_PRIORITY};

/// Multi-agent development platform over a pub/sub message bus.
#[derive(Parser)]
#[command(name = "devcrew", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the TOML settings file (default: ~/.devcrew/config.toml).
    #[arg(long, global = true, env = "DEVCREW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the agents and the REST/WebSocket API server.
    Serve {
        /// Host to bind to (overrides settings).
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides settings).
        #[arg(short, long)]
        port: Option<u16>,

        /// Use a process-local bus instead of Redis.
        #[arg(long)]
        in_memory: bool,
    },

    /// Send one message to an agent, or broadcast it when --to is omitted.
    Send {
        /// Sender id.
        #[arg(long)]
        from: String,

        /// Recipient agent id.
        #[arg(long)]
        to: Option<String>,

        /// Message type (task_request, task_response, task_update, agent_status,
        /// system_alert, coordination).
        #[arg(long = "type")]
        message_type: MessageType,

        /// JSON payload. Non-object values are wrapped as {"value": ...}.
        #[arg(long, default_value = "{}")]
        payload: String,

        /// Priority, 1 (highest) to 10 (lowest).
        #[arg(long, default_value_t = DEFAULT_PRIORITY)]
        priority: u8,

        /// Correlation id to attach.
        #[arg(long)]
        correlation_id: Option<String>,
    },

    /// Broadcast one message to every agent.
    Broadcast {
        #[arg(long)]
        from: String,

        #[arg(long = "type")]
        message_type: MessageType,

        #[arg(long, default_value = "{}")]
        payload: String,
    },

    /// Send a message and wait for the correlated reply.
    Request {
        #[arg(long)]
        from: String,

        #[arg(long)]
        to: String,

        #[arg(long = "type")]
        message_type: MessageType,

        #[arg(long, default_value = "{}")]
        payload: String,

        /// Seconds to wait (default: agents.request_timeout_secs).
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Print envelopes published on one or more channels.
    Listen {
        /// Channel to subscribe to (repeatable).
        #[arg(long = "channel", required = true)]
        channels: Vec<String>,

        /// Exit after this many envelopes.
        #[arg(long)]
        count: Option<usize>,
    },

    /// Show the effective settings after file and environment overrides.
    Config,

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn send_parses_type_and_defaults() {
        let cli = Cli::try_parse_from([
            "devcrew", "send", "--from", "ops", "--to", "developer", "--type", "task_request",
        ])
        .unwrap();
        match cli.command {
            Commands::Send {
                to,
                message_type,
                payload,
                priority,
                ..
            } => {
                assert_eq!(to.as_deref(), Some("developer"));
                assert_eq!(message_type, MessageType::TaskRequest);
                assert_eq!(payload, "{}");
                assert_eq!(priority, DEFAULT_PRIORITY);
            }
            _ => panic!("expected send"),
        }
    }

    #[test]
    fn unknown_message_type_is_rejected() {
        let result = Cli::try_parse_from(["devcrew", "broadcast", "--from", "ops", "--type", "gossip"]);
        assert!(result.is_err());
    }

    #[test]
    fn listen_collects_repeated_channels() {
        let cli = Cli::try_parse_from([
            "devcrew", "-vv", "listen", "--channel", "broadcast", "--channel", "agent_reviewer",
            "--count", "3",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Listen { channels, count } => {
                assert_eq!(channels, vec!["broadcast", "agent_reviewer"]);
                assert_eq!(count, Some(3));
            }
            _ => panic!("expected listen"),
        }
    }
}

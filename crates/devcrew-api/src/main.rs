//! devcrew CLI and REST API entry point.
//!
//! Binary name: `devcrew`
//!
//! Parses CLI arguments, loads settings, installs tracing, then dispatches
//! to a one-shot bus command or starts the agents and the API server.

mod cli;
mod http;
mod state;

use clap::Parser;
use clap_complete::generate;

use cli::{Cli, Commands};
use devcrew_infra::config::{load_settings, resolve_config_path};
use devcrew_observe::{filter_for, init_tracing, shutdown_tracing, TracingOptions};
use devcrew_types::config::Settings;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Shell completions don't need settings or tracing
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "devcrew", &mut std::io::stdout());
        return Ok(());
    }

    let config_path = resolve_config_path(cli.config.as_deref());
    let (mut settings, config_problems) = load_settings(&config_path).await;

    let filter = filter_for(&settings.app.log_level, cli.verbose, cli.quiet);
    let options = TracingOptions::new(filter)
        .json(settings.app.log_json)
        .otel(settings.app.otel);
    init_tracing(&options).map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    for problem in &config_problems {
        tracing::warn!(path = %config_path.display(), "{problem}; using defaults for this value");
    }

    let outcome = match cli.command {
        Commands::Serve {
            host,
            port,
            in_memory,
        } => {
            if let Some(host) = host {
                settings.server.host = host;
            }
            if let Some(port) = port {
                settings.server.port = port;
            }
            serve(settings, in_memory, cli.quiet).await
        }

        Commands::Send {
            from,
            to,
            message_type,
            payload,
            priority,
            correlation_id,
        } => {
            cli::message::send(
                &settings,
                &from,
                to.as_deref(),
                message_type,
                &payload,
                priority,
                correlation_id,
                cli.json,
            )
            .await
        }

        Commands::Broadcast {
            from,
            message_type,
            payload,
        } => cli::message::broadcast(&settings, &from, message_type, &payload, cli.json).await,

        Commands::Request {
            from,
            to,
            message_type,
            payload,
            timeout,
        } => {
            cli::message::request(&settings, &from, &to, message_type, &payload, timeout, cli.json)
                .await
        }

        Commands::Listen { channels, count } => {
            cli::message::listen(&settings, &channels, count, cli.json).await
        }

        Commands::Config => cli::config::show_config(&settings, &config_path, cli.json),

        Commands::Completions { .. } => Ok(()),
    };

    shutdown_tracing();
    outcome
}

/// Start the bus, attach the agents and serve HTTP until a shutdown signal.
async fn serve(settings: Settings, in_memory: bool, quiet: bool) -> anyhow::Result<()> {
    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let state = AppState::from_settings(settings, in_memory)?;
    state.start().await?;

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) => {
            state.shutdown().await;
            return Err(err.into());
        }
    };

    tracing::info!(%addr, transport = %state.bus.transport_name(), "API server listening");
    if !quiet {
        println!(
            "  {} {} listening on {}",
            console::style("⚡").bold(),
            console::style(&state.settings.app.name).bold(),
            console::style(format!("http://{addr}")).cyan()
        );
        println!("  {}", console::style("Press Ctrl+C to stop").dim());
    }

    let router = http::router::build_router(state.clone());
    let served = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    state.shutdown().await;
    if !quiet {
        println!("\n  Server stopped.");
    }
    served.map_err(Into::into)
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!("failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

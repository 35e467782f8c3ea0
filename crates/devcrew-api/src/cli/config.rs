//! `devcrew config`: print the effective settings.

use std::path::Path;

use anyhow::Result;
use console::style;

use devcrew_infra::redis_transport::redact_url;
use devcrew_types::config::Settings;

/// Copy of `settings` safe to print: the Redis password is masked.
pub fn redacted(settings: &Settings) -> Settings {
    let mut shown = settings.clone();
    if !shown.redis.password.is_empty() {
        shown.redis.password = "***".to_string();
    }
    shown.redis.url = shown.redis.url.as_deref().map(redact_url);
    shown
}

pub fn show_config(settings: &Settings, path: &Path, json: bool) -> Result<()> {
    let shown = redacted(settings);

    if json {
        let out = serde_json::json!({
            "config_path": path.display().to_string(),
            "config_file_exists": path.exists(),
            "settings": shown,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let source = if path.exists() {
        style("loaded").green()
    } else {
        style("not found, using defaults").yellow()
    };

    println!();
    println!(
        "  {} {} v{}",
        style("⚙").bold(),
        style(&shown.app.name).bold(),
        shown.app.version
    );
    println!("  Config file: {} ({})", style(path.display()).dim(), source);
    println!();

    println!("  {}", style("── App ──").dim());
    println!("  Environment: {}", style(&shown.app.environment).cyan());
    println!("  Debug:       {}", shown.app.debug);
    println!("  Log level:   {}", shown.app.log_level);
    println!();

    println!("  {}", style("── Broker ──").dim());
    println!("  Redis:   {}", style(redact_url(&settings.redis.redis_url())).cyan());
    println!("  Timeout: {}s", shown.redis.socket_timeout_secs);
    println!();

    println!("  {}", style("── Server ──").dim());
    println!("  Listen:  http://{}:{}", shown.server.host, shown.server.port);
    if !shown.server.cors_origins.is_empty() {
        println!("  CORS:    {}", shown.server.cors_origins.join(", "));
    }
    println!();

    println!("  {}", style("── Agents ──").dim());
    println!("  Request timeout: {}s", shown.agents.request_timeout_secs);
    println!("  History limit:   {}", shown.agents.history_limit);
    println!("  Workflow history: {}", shown.agents.workflow_history);
    println!();
    Ok(())
}

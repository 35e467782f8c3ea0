//! Settings types for devcrew.
//!
//! `Settings` represents the top-level `config.toml`. Every field has a
//! default so an empty file (or no file) yields a working development setup.

use serde::{Deserialize, Serialize};

/// Top-level configuration for the platform.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub app: AppSettings,
    #[serde(default)]
    pub redis: RedisSettings,
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub agents: AgentSettings,
}

/// Application identity and logging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub name: String,
    pub version: String,
    pub environment: String,
    pub debug: bool,
    pub log_level: String,
    /// Emit logs as JSON lines instead of human-readable text.
    pub log_json: bool,
    /// Export spans through OpenTelemetry (stdout exporter).
    pub otel: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            name: "Multi-Agent Development Platform".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            environment: "development".to_string(),
            debug: true,
            log_level: "info".to_string(),
            log_json: false,
            otel: false,
        }
    }
}

impl AppSettings {
    pub fn is_development(&self) -> bool {
        matches!(self.environment.to_lowercase().as_str(), "development" | "dev")
    }

    pub fn is_production(&self) -> bool {
        matches!(self.environment.to_lowercase().as_str(), "production" | "prod")
    }

    pub fn is_testing(&self) -> bool {
        matches!(self.environment.to_lowercase().as_str(), "testing" | "test")
    }
}

/// Connection parameters for the Redis broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisSettings {
    pub host: String,
    pub port: u16,
    pub password: String,
    pub db: u32,
    /// Full connection URL. Takes precedence over the discrete fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Upper bound on the connect handshake.
    pub socket_timeout_secs: u64,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            password: String::new(),
            db: 0,
            url: None,
            socket_timeout_secs: 5,
        }
    }
}

impl RedisSettings {
    /// Resolve the broker URL: explicit `url`, else assembled from parts.
    pub fn redis_url(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        if self.password.is_empty() {
            format!("redis://{}:{}/{}", self.host, self.port, self.db)
        } else {
            format!(
                "redis://:{}@{}:{}/{}",
                self.password, self.host, self.port, self.db
            )
        }
    }
}

/// HTTP/WebSocket listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origins. Empty means "any" in debug, localhost UIs otherwise.
    pub cors_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            cors_origins: Vec::new(),
        }
    }
}

/// Agent runtime and request/response defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Default wait for `request_response`.
    pub request_timeout_secs: u64,
    /// Completed-task history cap per agent.
    pub history_limit: usize,
    /// Idle time after which a health check reports a warning.
    pub inactivity_warning_secs: u64,
    /// Finished workflow runs kept for status queries.
    pub workflow_history: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            history_limit: 100,
            inactivity_warning_secs: 3600,
            workflow_history: 100,
        }
    }
}

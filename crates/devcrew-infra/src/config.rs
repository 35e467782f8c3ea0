//! Settings loader for devcrew.
//!
//! Reads `config.toml` and deserializes it into [`Settings`], then layers
//! `DEVCREW_*` environment overrides on top. Falls back to defaults when the
//! file is missing or malformed.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use devcrew_types::config::Settings;
use devcrew_types::error::ConfigError;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "DEVCREW_CONFIG";

/// Resolve the config file path.
///
/// Priority:
/// 1. Explicit path (the `--config` flag)
/// 2. `DEVCREW_CONFIG` environment variable
/// 3. `~/.devcrew/config.toml`
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        return PathBuf::from(path);
    }
    default_config_dir().join("config.toml")
}

fn default_config_dir() -> PathBuf {
    match dirs::home_dir() {
        Some(home) => home.join(".devcrew"),
        None => PathBuf::from(".devcrew"),
    }
}

/// Load settings from `path`, then apply process environment overrides.
///
/// Never fails: a missing file yields defaults, an unreadable or unparsable
/// file yields defaults plus a reported problem, and invalid overrides are
/// skipped and reported. Problems are returned rather than logged so callers
/// can report them once the tracing subscriber is installed.
pub async fn load_settings(path: &Path) -> (Settings, Vec<ConfigError>) {
    let mut problems = Vec::new();
    let mut settings = match read_settings(path).await {
        Ok(Some(settings)) => settings,
        Ok(None) => Settings::default(),
        Err(err) => {
            problems.push(err);
            Settings::default()
        }
    };

    problems.extend(apply_env_overrides(&mut settings, |key| {
        std::env::var(key).ok()
    }));
    (settings, problems)
}

/// Read and parse `path`. `Ok(None)` when the file does not exist.
pub async fn read_settings(path: &Path) -> Result<Option<Settings>, ConfigError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(ConfigError::Read {
                path: path.display().to_string(),
                reason: err.to_string(),
            });
        }
    };

    toml::from_str::<Settings>(&content)
        .map(Some)
        .map_err(|err| ConfigError::Parse {
            path: path.display().to_string(),
            reason: err.to_string(),
        })
}

/// Apply `DEVCREW_*` overrides read through `lookup`.
///
/// Every override that is present and valid is applied; the rest are
/// returned as errors.
pub fn apply_env_overrides<F>(settings: &mut Settings, lookup: F) -> Vec<ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut errors = Vec::new();

    if let Some(url) = lookup("DEVCREW_REDIS_URL") {
        settings.redis.url = Some(url);
    }
    if let Some(host) = lookup("DEVCREW_REDIS_HOST") {
        settings.redis.host = host;
    }
    if let Some(password) = lookup("DEVCREW_REDIS_PASSWORD") {
        settings.redis.password = password;
    }
    if let Some(level) = lookup("DEVCREW_LOG_LEVEL") {
        settings.app.log_level = level;
    }
    if let Some(environment) = lookup("DEVCREW_ENVIRONMENT") {
        settings.app.environment = environment;
    }
    if let Some(host) = lookup("DEVCREW_HOST") {
        settings.server.host = host;
    }

    parse_into(&lookup, "DEVCREW_REDIS_PORT", &mut settings.redis.port, &mut errors);
    parse_into(&lookup, "DEVCREW_REDIS_DB", &mut settings.redis.db, &mut errors);
    parse_into(&lookup, "DEVCREW_PORT", &mut settings.server.port, &mut errors);

    errors
}

fn parse_into<F, T>(lookup: &F, key: &str, target: &mut T, errors: &mut Vec<ConfigError>)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *target = value,
        Err(err) => errors.push(ConfigError::InvalidOverride {
            key: key.to_string(),
            reason: format!("{raw:?}: {err}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[tokio::test]
    async fn read_settings_missing_file_is_none() {
        let tmp = TempDir::new().unwrap();
        let result = read_settings(&tmp.path().join("config.toml")).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn read_settings_valid_toml() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        tokio::fs::write(
            &path,
            r#"
[app]
environment = "production"
debug = false

[redis]
host = "cache.internal"
port = 6380

[agents]
history_limit = 20
"#,
        )
        .await
        .unwrap();

        let settings = read_settings(&path).await.unwrap().unwrap();
        assert!(settings.app.is_production());
        assert_eq!(settings.redis.redis_url(), "redis://cache.internal:6380/0");
        assert_eq!(settings.agents.history_limit, 20);
        assert_eq!(settings.server.port, 8000);
    }

    #[tokio::test]
    async fn read_settings_invalid_toml_is_parse_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        tokio::fs::write(&path, "this is not { valid toml !!!")
            .await
            .unwrap();

        let err = read_settings(&path).await.unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[tokio::test]
    async fn load_settings_invalid_toml_falls_back_to_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        tokio::fs::write(&path, "[redis\nport = ").await.unwrap();

        let (settings, problems) = load_settings(&path).await;
        assert_eq!(settings.agents, Settings::default().agents);
        assert!(matches!(problems.first(), Some(ConfigError::Parse { .. })));
    }

    #[test]
    fn env_overrides_apply() {
        let mut settings = Settings::default();
        let errors = apply_env_overrides(
            &mut settings,
            env(&[
                ("DEVCREW_REDIS_HOST", "redis.svc"),
                ("DEVCREW_REDIS_PORT", "6390"),
                ("DEVCREW_REDIS_DB", "3"),
                ("DEVCREW_PORT", "9000"),
                ("DEVCREW_LOG_LEVEL", "debug"),
                ("DEVCREW_ENVIRONMENT", "testing"),
            ]),
        );
        assert!(errors.is_empty());
        assert_eq!(settings.redis.redis_url(), "redis://redis.svc:6390/3");
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.app.log_level, "debug");
        assert!(settings.app.is_testing());
    }

    #[test]
    fn env_url_override_wins() {
        let mut settings = Settings::default();
        apply_env_overrides(
            &mut settings,
            env(&[
                ("DEVCREW_REDIS_URL", "redis://elsewhere:7000/1"),
                ("DEVCREW_REDIS_HOST", "ignored"),
            ]),
        );
        assert_eq!(settings.redis.redis_url(), "redis://elsewhere:7000/1");
    }

    #[test]
    fn invalid_override_is_reported_and_skipped() {
        let mut settings = Settings::default();
        let errors = apply_env_overrides(&mut settings, env(&[("DEVCREW_PORT", "eighty")]));
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            &errors[0],
            ConfigError::InvalidOverride { key, .. } if key == "DEVCREW_PORT"
        ));
        assert_eq!(settings.server.port, 8000);
    }

    #[test]
    fn explicit_config_path_wins() {
        let path = resolve_config_path(Some(Path::new("/etc/devcrew.toml")));
        assert_eq!(path, PathBuf::from("/etc/devcrew.toml"));
    }
}

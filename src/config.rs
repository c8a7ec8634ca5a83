use std::env;

use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://your-app-url.com";

/// Runtime settings resolved from `.env` and the process environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub notify: NotifyConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn require_url(&self) -> Result<&str, ConfigError> {
        self.url.as_deref().ok_or(ConfigError::Missing("DATABASE_URL"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyConfig {
    pub webhook_url: Option<String>,
    pub base_url: String,
}

impl NotifyConfig {
    pub fn require_webhook(&self) -> Result<&str, ConfigError> {
        self.webhook_url
            .as_deref()
            .ok_or(ConfigError::Missing("SLACK_WEBHOOK_URL"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    pub log_level: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("HEALTH_MAX_CONNECTIONS must be a positive integer, got '{0}'")]
    InvalidMaxConnections(String),
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let max_connections = match non_empty("HEALTH_MAX_CONNECTIONS") {
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|value| *value > 0)
                .ok_or(ConfigError::InvalidMaxConnections(raw))?,
            None => 5,
        };

        Ok(Self {
            database: DatabaseConfig {
                url: non_empty("DATABASE_URL"),
                max_connections,
            },
            notify: NotifyConfig {
                webhook_url: non_empty("SLACK_WEBHOOK_URL"),
                base_url: non_empty("APP_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            },
            telemetry: TelemetryConfig {
                log_level: non_empty("HEALTH_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_set() {
        let config = AppConfig::from_lookup(lookup(&[])).expect("defaults");
        assert_eq!(config.database.url, None);
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.notify.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.telemetry.log_level, "info");
        assert_eq!(
            config.database.require_url().unwrap_err(),
            ConfigError::Missing("DATABASE_URL")
        );
        assert!(config.notify.require_webhook().is_err());
    }

    #[test]
    fn reads_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/health"),
            ("HEALTH_MAX_CONNECTIONS", "12"),
            ("APP_BASE_URL", "https://health.example.com"),
            ("HEALTH_LOG_LEVEL", "debug"),
            ("SLACK_WEBHOOK_URL", "https://hooks.example.com/T000"),
        ]))
        .expect("config");

        assert_eq!(config.database.require_url(), Ok("postgres://localhost/health"));
        assert_eq!(config.database.max_connections, 12);
        assert_eq!(config.notify.base_url, "https://health.example.com");
        assert_eq!(config.telemetry.log_level, "debug");
    }

    #[test]
    fn blank_values_count_as_unset() {
        let config = AppConfig::from_lookup(lookup(&[("DATABASE_URL", "  ")])).expect("config");
        assert_eq!(config.database.url, None);
    }

    #[test]
    fn rejects_bad_connection_count() {
        let err = AppConfig::from_lookup(lookup(&[("HEALTH_MAX_CONNECTIONS", "0")])).unwrap_err();
        assert_eq!(err, ConfigError::InvalidMaxConnections("0".to_string()));
    }
}

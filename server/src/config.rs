//! Server configuration.
//!
//! Defaults match a local setup: listen on `0.0.0.0:9000`, database at
//! `localhost:3301` as user `todo` / `test`, space `todo`, 60 second request
//! timeout, 5 second shutdown grace. Every value can be overridden from the
//! environment:
//!
//! | variable                    | field                       |
//! |-----------------------------|-----------------------------|
//! | `TODO_HOST`                 | `host`                      |
//! | `TODO_PORT`                 | `port`                      |
//! | `TODO_REQUEST_TIMEOUT_SECS` | `request_timeout_secs`      |
//! | `TODO_SHUTDOWN_GRACE_SECS`  | `shutdown_grace_secs`       |
//! | `TODO_LOG_FORMAT`           | `log_format` (`text`/`json`)|
//! | `TODO_DB_HOST`              | `database.host`             |
//! | `TODO_DB_USER`              | `database.user`             |
//! | `TODO_DB_PASSWORD`          | `database.password`         |
//! | `TODO_DB_SPACE`             | `database.space`            |

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} must be {expected}, got `{value}`")]
    Invalid {
        key: &'static str,
        expected: &'static str,
        value: String,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Storage connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// `host:port` of the database server.
    #[serde(default = "default_db_host")]
    pub host: String,

    #[serde(default = "default_db_user")]
    pub user: String,

    #[serde(default = "default_db_password", skip_serializing)]
    pub password: String,

    /// Space holding the todo tuples.
    #[serde(default = "default_db_space")]
    pub space: String,
}

fn default_db_host() -> String {
    "localhost:3301".to_string()
}

fn default_db_user() -> String {
    "todo".to_string()
}

fn default_db_password() -> String {
    "test".to_string()
}

fn default_db_space() -> String {
    "todo".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: default_db_host(),
            user: default_db_user(),
            password: default_db_password(),
            space: default_db_space(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Upper bound on handling a single request.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// How long in-flight requests may run after a shutdown signal.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    #[serde(default)]
    pub log_format: LogFormat,

    #[serde(default)]
    pub database: DatabaseConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9000
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_shutdown_grace_secs() -> u64 {
    5
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            log_format: LogFormat::default(),
            database: DatabaseConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source, starting from the
    /// defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(host) = lookup("TODO_HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("TODO_PORT") {
            config.port = parse("TODO_PORT", port, "a port number")?;
        }
        if let Some(secs) = lookup("TODO_REQUEST_TIMEOUT_SECS") {
            config.request_timeout_secs =
                parse("TODO_REQUEST_TIMEOUT_SECS", secs, "a number of seconds")?;
        }
        if let Some(secs) = lookup("TODO_SHUTDOWN_GRACE_SECS") {
            config.shutdown_grace_secs =
                parse("TODO_SHUTDOWN_GRACE_SECS", secs, "a number of seconds")?;
        }
        if let Some(format) = lookup("TODO_LOG_FORMAT") {
            config.log_format = match format.to_ascii_lowercase().as_str() {
                "text" => LogFormat::Text,
                "json" => LogFormat::Json,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "TODO_LOG_FORMAT",
                        expected: "`text` or `json`",
                        value: format,
                    })
                }
            };
        }
        if let Some(host) = lookup("TODO_DB_HOST") {
            config.database.host = host;
        }
        if let Some(user) = lookup("TODO_DB_USER") {
            config.database.user = user;
        }
        if let Some(password) = lookup("TODO_DB_PASSWORD") {
            config.database.password = password;
        }
        if let Some(space) = lookup("TODO_DB_SPACE") {
            config.database.space = space;
        }

        Ok(config)
    }

    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

fn parse<T: std::str::FromStr>(
    key: &'static str,
    value: String,
    expected: &'static str,
) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid { key, expected, value })
}

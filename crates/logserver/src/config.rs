// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::time::Duration;

use crate::codec::DEFAULT_MAX_LINE_LENGTH;
use crate::errors::ConfigError;
use crate::listener::ConnectionSettings;
use crate::queue::DEFAULT_QUEUE_CAPACITY;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 6839;
pub const DEFAULT_KEEPALIVE_SECS: u64 = 5;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Where rendered log lines are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    /// One line per entry on standard output.
    Stdout,
    /// Through the server's own tracing subscriber.
    Log,
}

impl OutputKind {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "stdout" => Some(Self::Stdout),
            "log" => Some(Self::Log),
            _ => None,
        }
    }
}

/// Configuration for the log server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind the listener to (e.g., "0.0.0.0")
    pub host: String,
    /// Port to bind the listener to, 0 picks an ephemeral port
    pub port: u16,
    /// Number of entries buffered between connections and the sink
    pub queue_capacity: usize,
    /// Longest accepted line, in bytes
    pub max_line_length: usize,
    /// TCP keep-alive period for accepted connections
    pub keepalive: Duration,
    /// Destination of rendered lines
    pub output: OutputKind,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            keepalive: Duration::from_secs(DEFAULT_KEEPALIVE_SECS),
            output: OutputKind::Stdout,
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Create configuration from environment variables.
    ///
    /// Numbers that fail to parse fall back to their defaults; the remaining
    /// values are checked by [`ServerConfig::validate`].
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("LOGSERVER_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string());
        let port = env::var("LOGSERVER_PORT")
            .ok()
            .and_then(|port| port.parse::<u16>().ok())
            .unwrap_or(DEFAULT_PORT);
        let queue_capacity = env::var("LOGSERVER_QUEUE_CAPACITY")
            .ok()
            .and_then(|val| val.parse::<usize>().ok())
            .unwrap_or(DEFAULT_QUEUE_CAPACITY);
        let max_line_length = env::var("LOGSERVER_MAX_LINE_LENGTH")
            .ok()
            .and_then(|val| val.parse::<usize>().ok())
            .unwrap_or(DEFAULT_MAX_LINE_LENGTH);
        let keepalive = env::var("LOGSERVER_KEEPALIVE_SECS")
            .ok()
            .and_then(|val| val.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_KEEPALIVE_SECS));
        let output = match env::var("LOGSERVER_OUTPUT") {
            Ok(val) => OutputKind::parse(&val).ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "Invalid output '{}'. Must be one of: stdout, log",
                    val
                ))
            })?,
            Err(_) => OutputKind::Stdout,
        };
        let log_level = env::var("LOGSERVER_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or_else(|_| "info".to_string());

        let config = Self {
            host,
            port,
            queue_capacity,
            max_line_length,
            keepalive,
            output,
            log_level,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "LOGSERVER_HOST cannot be empty".to_string(),
            ));
        }

        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "Queue capacity must be greater than 0".to_string(),
            ));
        }

        if self.max_line_length == 0 {
            return Err(ConfigError::Invalid(
                "Maximum line length must be greater than 0".to_string(),
            ));
        }

        if self.keepalive.is_zero() {
            return Err(ConfigError::Invalid(
                "Keep-alive period must be greater than 0".to_string(),
            ));
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }

    /// `host:port` string the listener binds to.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    #[must_use]
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            keepalive: self.keepalive,
            max_line_length: self.max_line_length,
        }
    }
}

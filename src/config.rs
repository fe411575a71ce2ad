//! Proxy configuration.
//!
//! Loaded from a YAML file, then overridden from the environment, then
//! validated. The proxy core only ever sees a finished, validated `Config`.

use crate::error::ProxyError;
use crate::http::connection::ConnectionSettings;
use crate::proxy::client::ClientSettings;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: &[&str] = &["json", "pretty", "compact"];

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub keep_alive: KeepAliveConfig,
    pub connection_pool: ConnectionPoolConfig,
    /// Backend addresses in round-robin order
    pub backends: Vec<String>,
    pub pre_warm: PreWarmConfig,
    pub logging: LoggingConfig,
    pub tls: TlsConfig,
}

/// Inbound listener settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_address: String,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    /// 0 disables the per-IP cap
    pub max_connections_per_ip: usize,
    pub max_request_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: "127.0.0.1:8080".to_string(),
            read_timeout_ms: 5_000,
            write_timeout_ms: 5_000,
            max_connections_per_ip: 0,
            max_request_body_size: 512 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct KeepAliveConfig {
    pub enabled: bool,
    /// Idle wait for the next request on an inbound connection
    pub client_timeout_ms: u64,
    /// Idle lifetime of pooled backend connections
    pub backend_timeout_ms: u64,
    /// 0 means unlimited
    pub max_requests_per_conn: usize,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            client_timeout_ms: 10_000,
            backend_timeout_ms: 30_000,
            max_requests_per_conn: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionPoolConfig {
    pub max_conns_per_host: usize,
    pub connect_timeout_ms: u64,
    pub max_conn_lifetime_ms: u64,
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        Self {
            max_conns_per_host: 512,
            connect_timeout_ms: 3_000,
            max_conn_lifetime_ms: 90_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PreWarmConfig {
    pub enabled: bool,
    pub requests_per_backend: usize,
}

impl Default for PreWarmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            requests_per_backend: 8,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

/// Outbound TLS settings for https backends
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Extra PEM roots trusted in addition to the built-in set
    pub ca_file: Option<PathBuf>,
}

impl Config {
    /// Read the YAML file at `path`, apply environment overrides and validate.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;

        let mut cfg = Self::from_yaml(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        cfg.apply_overrides(|key| std::env::var(key).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a YAML document. Missing sections take their defaults.
    pub fn from_yaml(raw: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Apply overrides from an environment-like lookup:
    /// `LISTEN`, `SLUICE_BACKENDS` (comma separated) and `SLUICE_LOG_LEVEL`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(listen) = lookup("LISTEN") {
            self.server.listen_address = listen;
        }
        if let Some(backends) = lookup("SLUICE_BACKENDS") {
            self.backends = backends
                .split(',')
                .map(str::trim)
                .filter(|b| !b.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(level) = lookup("SLUICE_LOG_LEVEL") {
            self.logging.level = level.to_ascii_lowercase();
        }
    }

    /// Semantic checks that serde cannot express.
    pub fn validate(&self) -> Result<(), ProxyError> {
        if self.server.listen_address.trim().is_empty() {
            return Err(ProxyError::config("server.listen_address must not be empty"));
        }
        if self.backends.is_empty() {
            return Err(ProxyError::config("at least one backend is required"));
        }

        let timeouts = [
            ("server.read_timeout_ms", self.server.read_timeout_ms),
            ("server.write_timeout_ms", self.server.write_timeout_ms),
            ("keep_alive.client_timeout_ms", self.keep_alive.client_timeout_ms),
            ("keep_alive.backend_timeout_ms", self.keep_alive.backend_timeout_ms),
            ("connection_pool.connect_timeout_ms", self.connection_pool.connect_timeout_ms),
            ("connection_pool.max_conn_lifetime_ms", self.connection_pool.max_conn_lifetime_ms),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, value)| *value == 0) {
            return Err(ProxyError::config(format!("{name} must be greater than zero")));
        }

        if self.connection_pool.max_conns_per_host == 0 {
            return Err(ProxyError::config(
                "connection_pool.max_conns_per_host must be greater than zero",
            ));
        }
        if self.pre_warm.enabled && self.pre_warm.requests_per_backend == 0 {
            return Err(ProxyError::config(
                "pre_warm.requests_per_backend must be greater than zero when pre-warming is enabled",
            ));
        }
        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(ProxyError::config(format!(
                "unknown logging.level {:?}",
                self.logging.level
            )));
        }
        if !LOG_FORMATS.contains(&self.logging.format.as_str()) {
            return Err(ProxyError::config(format!(
                "unknown logging.format {:?}",
                self.logging.format
            )));
        }

        Ok(())
    }

    /// Settings for every backend client
    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            max_connections: self.connection_pool.max_conns_per_host,
            max_idle_duration: Duration::from_millis(self.keep_alive.backend_timeout_ms),
            max_lifetime: Duration::from_millis(self.connection_pool.max_conn_lifetime_ms),
            connect_timeout: Duration::from_millis(self.connection_pool.connect_timeout_ms),
            read_timeout: Duration::from_millis(self.server.read_timeout_ms),
            write_timeout: Duration::from_millis(self.server.write_timeout_ms),
        }
    }

    /// Settings for every inbound connection
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            read_timeout: Duration::from_millis(self.server.read_timeout_ms),
            write_timeout: Duration::from_millis(self.server.write_timeout_ms),
            idle_timeout: Duration::from_millis(self.keep_alive.client_timeout_ms),
            keep_alive: self.keep_alive.enabled,
            max_requests_per_conn: self.keep_alive.max_requests_per_conn,
            max_request_body_size: self.server.max_request_body_size,
        }
    }
}

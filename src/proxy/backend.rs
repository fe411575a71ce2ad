//! Backend descriptors and the backend table
//!
//! A [`BackendTarget`] is a validated backend address with its transport
//! mode. The [`BackendTable`] pairs each target with the client that owns its
//! connection pool, in configuration order.

use crate::error::{ProxyError, Result};
use crate::proxy::client::BackendClient;
use std::fmt;

/// How the proxy reaches a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// Plain HTTP over TCP
    Http,
    /// HTTP over TLS over TCP
    Https,
    /// HTTP over a local Unix domain socket
    Unix,
}

impl TransportMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportMode::Http => "http",
            TransportMode::Https => "https",
            TransportMode::Unix => "unix",
        }
    }
}

/// A resolved, validated backend target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendTarget {
    /// The address as configured (e.g., "http://localhost:3000")
    raw: String,
    mode: TransportMode,
    /// host:port for TCP targets, socket path for Unix targets
    address: String,
    /// Value sent as the outbound `Host` header
    host: String,
    /// TLS server name for https targets
    server_name: Option<String>,
}

impl BackendTarget {
    /// Parse and validate a configured backend address.
    ///
    /// Accepted forms are `http://host[:port]`, `https://host[:port]` and
    /// `unix:///path/to.sock` (or `unix:/path/to.sock`).
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();

        if let Some(path) = raw
            .strip_prefix("unix://")
            .or_else(|| raw.strip_prefix("unix:"))
        {
            if !path.starts_with('/') || path.len() < 2 {
                return Err(ProxyError::config(format!(
                    "unix backend must name an absolute socket path: {raw}"
                )));
            }
            return Ok(Self {
                raw: raw.to_string(),
                mode: TransportMode::Unix,
                address: path.to_string(),
                host: "localhost".to_string(),
                server_name: None,
            });
        }

        let (mode, rest) = if let Some(rest) = raw.strip_prefix("http://") {
            (TransportMode::Http, rest)
        } else if let Some(rest) = raw.strip_prefix("https://") {
            (TransportMode::Https, rest)
        } else {
            return Err(ProxyError::config(format!(
                "backend URL must start with http://, https:// or unix://: {raw}"
            )));
        };

        let url = url::Url::parse(raw)
            .map_err(|e| ProxyError::config(format!("invalid backend URL {raw}: {e}")))?;

        if !url.username().is_empty() || url.password().is_some() {
            return Err(ProxyError::config(format!(
                "backend URL must not carry credentials: {raw}"
            )));
        }
        if url.path() != "/" || url.query().is_some() || url.fragment().is_some() {
            return Err(ProxyError::config(format!(
                "backend URL must not carry a path, query or fragment: {raw}"
            )));
        }

        let host = url
            .host()
            .ok_or_else(|| ProxyError::config(format!("backend URL missing host: {raw}")))?;
        let server_name = match host {
            url::Host::Domain(domain) => domain.to_string(),
            url::Host::Ipv4(ip) => ip.to_string(),
            url::Host::Ipv6(ip) => ip.to_string(),
        };
        let host_str = url.host_str().unwrap_or_default();
        let port = url.port_or_known_default().unwrap_or(match mode {
            TransportMode::Https => 443,
            _ => 80,
        });

        // The Host header is the authority exactly as configured
        let authority = rest.split('/').next().unwrap_or(rest);

        Ok(Self {
            raw: raw.to_string(),
            mode,
            address: format!("{host_str}:{port}"),
            host: authority.to_string(),
            server_name: (mode == TransportMode::Https).then_some(server_name),
        })
    }

    pub fn mode(&self) -> TransportMode {
        self.mode
    }

    /// host:port for TCP targets, socket path for Unix targets
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn host_header(&self) -> &str {
        &self.host
    }

    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for BackendTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// One slot of the backend table
#[derive(Debug)]
pub struct Backend {
    pub target: BackendTarget,
    pub client: BackendClient,
}

/// Ordered, fixed set of backends. Order defines the round-robin sequence.
#[derive(Debug)]
pub struct BackendTable {
    backends: Vec<Backend>,
}

impl BackendTable {
    /// Build a table, rejecting an empty backend list
    pub fn new(backends: Vec<Backend>) -> Result<Self> {
        if backends.is_empty() {
            return Err(ProxyError::config("at least one backend is required"));
        }
        Ok(Self { backends })
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Backend> {
        self.backends.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Backend> {
        self.backends.iter()
    }

    pub fn targets(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.target.as_str()).collect()
    }
}

impl std::ops::Index<usize> for BackendTable {
    type Output = Backend;

    fn index(&self, index: usize) -> &Backend {
        &self.backends[index]
    }
}

impl<'a> IntoIterator for &'a BackendTable {
    type Item = &'a Backend;
    type IntoIter = std::slice::Iter<'a, Backend>;

    fn into_iter(self) -> Self::IntoIter {
        self.backends.iter()
    }
}

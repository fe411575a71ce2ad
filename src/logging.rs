//! Logging setup and the logging switch handed to the proxy core.
//!
//! The subscriber is installed once by the binary. Core components receive a
//! [`LogSwitch`] and check it before building any log fields, so a proxy with
//! logging disabled does no logging work on the request path.

use crate::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Whether the proxy core emits log events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogSwitch {
    enabled: bool,
}

impl LogSwitch {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn enabled() -> Self {
        Self::new(true)
    }

    pub fn disabled() -> Self {
        Self::new(false)
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl Default for LogSwitch {
    fn default() -> Self {
        Self::disabled()
    }
}

impl From<&LoggingConfig> for LogSwitch {
    fn from(cfg: &LoggingConfig) -> Self {
        Self::new(cfg.enabled)
    }
}

/// Install the global tracing subscriber. `RUST_LOG` overrides the configured level.
pub fn init(cfg: &LoggingConfig) -> anyhow::Result<LogSwitch> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(cfg.level.as_str()))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true);

    let installed = match cfg.format.as_str() {
        "pretty" => builder.pretty().try_init(),
        "compact" => builder.compact().try_init(),
        _ => builder.json().try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("failed to install log subscriber: {e}"))?;

    Ok(LogSwitch::from(cfg))
}

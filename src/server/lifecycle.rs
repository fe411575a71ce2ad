//! Proxy lifecycle: construction, serving and graceful shutdown.
//!
//! ```text
//! Constructed ──start()──▶ Running ──shutdown()──▶ ShuttingDown ──▶ Stopped
//!      └──────────────────shutdown()──────────────────▲
//! ```
//!
//! `start()` and `shutdown()` take `&self` so a running proxy can be shut down
//! from another task through an `Arc<Proxy>`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::Config;
use crate::error::{ProxyError, Result};
use crate::logging::LogSwitch;
use crate::proxy::backend::{Backend, BackendTable, BackendTarget, TransportMode};
use crate::proxy::client::BackendClient;
use crate::proxy::prewarm::{prewarm, PrewarmReport};
use crate::proxy::selector::Selector;
use crate::proxy::transport::{tls_connector, Transport};
use crate::proxy::upstream::ProxyHandler;
use crate::server::limit::IpLimiter;
use crate::server::listener::{self, ListenerContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    Constructed = 0,
    Running = 1,
    ShuttingDown = 2,
    Stopped = 3,
}

impl LifecycleState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => LifecycleState::Constructed,
            1 => LifecycleState::Running,
            2 => LifecycleState::ShuttingDown,
            _ => LifecycleState::Stopped,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Constructed => "constructed",
            LifecycleState::Running => "running",
            LifecycleState::ShuttingDown => "shutting down",
            LifecycleState::Stopped => "stopped",
        }
    }
}

/// The reverse proxy: listener, backend table and every backend client
pub struct Proxy {
    config: Config,
    backends: Arc<BackendTable>,
    handler: Arc<ProxyHandler>,
    limiter: Arc<IpLimiter>,
    log: LogSwitch,
    state: AtomicU8,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    local_addr: OnceLock<SocketAddr>,
    prewarm_reports: Vec<PrewarmReport>,
}

impl Proxy {
    /// Validate the configuration, build one client per backend and, if
    /// enabled, pre-warm backend connections before returning.
    pub async fn new(config: Config, log: LogSwitch) -> Result<Self> {
        config.validate()?;

        let targets = config
            .backends
            .iter()
            .map(|raw| BackendTarget::parse(raw))
            .collect::<Result<Vec<_>>>()?;

        let tls = if targets.iter().any(|t| t.mode() == TransportMode::Https) {
            Some(tls_connector(config.tls.ca_file.as_deref())?)
        } else {
            None
        };

        let settings = config.client_settings();
        let backends = targets
            .into_iter()
            .map(|target| {
                let transport = Transport::for_target(&target, tls.as_ref())?;
                let client = BackendClient::new(&target, transport, settings);
                Ok(Backend { target, client })
            })
            .collect::<Result<Vec<_>>>()?;
        let backends = Arc::new(BackendTable::new(backends)?);

        let prewarm_reports = if config.pre_warm.enabled {
            prewarm(&backends, config.pre_warm.requests_per_backend, log).await
        } else {
            Vec::new()
        };

        let selector = Arc::new(Selector::new(backends.clone()));
        let handler = Arc::new(ProxyHandler::new(selector, log));
        let limiter = IpLimiter::new(config.server.max_connections_per_ip);

        Ok(Self {
            config,
            backends,
            handler,
            limiter,
            log,
            state: AtomicU8::new(LifecycleState::Constructed as u8),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            local_addr: OnceLock::new(),
            prewarm_reports,
        })
    }

    /// Bind the configured listen address and serve until shut down.
    pub async fn start(&self) -> Result<()> {
        let state = self.state();
        if state != LifecycleState::Constructed {
            return Err(ProxyError::InvalidState {
                expected: LifecycleState::Constructed.as_str(),
                actual: state.as_str(),
            });
        }

        let listener = TcpListener::bind(&self.config.server.listen_address)
            .await
            .map_err(ProxyError::Listener)?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener. Returns once shutdown was requested
    /// and every in-flight connection has finished, or on an accept failure.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        self.transition(LifecycleState::Constructed, LifecycleState::Running)?;

        // Keeps shutdown() waiting until the accept loop has let go of the socket
        let accepting = self.tracker.token();

        if let Ok(addr) = listener.local_addr() {
            let _ = self.local_addr.set(addr);
        }
        if self.log.is_enabled() {
            tracing::info!(
                address = %self.config.server.listen_address,
                backends = ?self.backends.targets(),
                "starting proxy server"
            );
        }

        let ctx = ListenerContext {
            handler: self.handler.clone(),
            settings: self.config.connection_settings(),
            limiter: self.limiter.clone(),
            shutdown: self.shutdown.clone(),
            tracker: self.tracker.clone(),
            log: self.log,
        };
        let result = listener::run(listener, ctx).await;
        drop(accepting);

        if result.is_ok() {
            self.tracker.close();
            self.tracker.wait().await;
        }
        result
    }

    /// Stop accepting, drain in-flight connections, then close idle backend
    /// connections. Every backend is closed even if an earlier one fails.
    pub async fn shutdown(&self) -> Result<()> {
        let previous = LifecycleState::from_u8(
            self.state
                .swap(LifecycleState::ShuttingDown as u8, Ordering::AcqRel),
        );
        let lifecycle = match previous {
            LifecycleState::Constructed | LifecycleState::Running => Ok(()),
            other => {
                // Someone else owns this shutdown; put the state back
                self.state.store(other as u8, Ordering::Release);
                Err(ProxyError::InvalidState {
                    expected: LifecycleState::Running.as_str(),
                    actual: other.as_str(),
                })
            }
        };

        if self.log.is_enabled() {
            tracing::info!("shutting down proxy server");
        }

        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;

        let mut close_error = None;
        for backend in self.backends.iter() {
            if self.log.is_enabled() {
                tracing::debug!(backend = %backend.target, "closing idle connections for backend");
            }
            if let Err(e) = backend.client.close_idle().await {
                if self.log.is_enabled() {
                    tracing::warn!(backend = %backend.target, error = %e, "failed to close idle connections");
                }
                close_error.get_or_insert(e);
            }
        }

        if lifecycle.is_ok() {
            self.state
                .store(LifecycleState::Stopped as u8, Ordering::Release);
        }

        lifecycle?;
        match close_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Address the listener is bound to, once serving
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    pub fn backends(&self) -> &BackendTable {
        &self.backends
    }

    pub fn handler(&self) -> &Arc<ProxyHandler> {
        &self.handler
    }

    pub fn selector(&self) -> &Selector {
        self.handler.selector()
    }

    pub fn prewarm_reports(&self) -> &[PrewarmReport] {
        &self.prewarm_reports
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn transition(&self, from: LifecycleState, to: LifecycleState) -> Result<()> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|actual| ProxyError::InvalidState {
                expected: from.as_str(),
                actual: LifecycleState::from_u8(actual).as_str(),
            })
    }
}

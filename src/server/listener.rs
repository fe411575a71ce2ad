use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::error::{ProxyError, Result};
use crate::http::connection::{Connection, ConnectionSettings};
use crate::logging::LogSwitch;
use crate::proxy::upstream::ProxyHandler;
use crate::server::limit::IpLimiter;

/// Everything the accept loop hands to each connection task
#[derive(Clone)]
pub struct ListenerContext {
    pub handler: Arc<ProxyHandler>,
    pub settings: ConnectionSettings,
    pub limiter: Arc<IpLimiter>,
    pub shutdown: CancellationToken,
    pub tracker: TaskTracker,
    pub log: LogSwitch,
}

/// Accept connections until `shutdown` is cancelled. Each connection runs on
/// its own task registered with the tracker. An accept failure is fatal.
pub async fn run(listener: TcpListener, ctx: ListenerContext) -> Result<()> {
    if ctx.log.is_enabled() {
        if let Ok(addr) = listener.local_addr() {
            info!(address = %addr, "listening");
        }
    }

    loop {
        let (socket, peer) = tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            accepted = listener.accept() => accepted.map_err(ProxyError::Listener)?,
        };

        let Some(guard) = ctx.limiter.try_acquire(peer.ip()) else {
            if ctx.log.is_enabled() {
                warn!(peer = %peer, "too many connections from client ip, closing");
            }
            drop(socket);
            continue;
        };

        if ctx.log.is_enabled() {
            debug!(peer = %peer, "accepted connection");
        }
        let _ = socket.set_nodelay(true);

        let handler = ctx.handler.clone();
        let settings = ctx.settings;
        let shutdown = ctx.shutdown.clone();
        let log = ctx.log;
        ctx.tracker.spawn(async move {
            let _guard = guard;
            let mut conn = Connection::new(socket, handler, settings, shutdown);
            if let Err(e) = conn.run().await {
                if log.is_enabled() {
                    debug!(peer = %peer, error = %e, "connection error");
                }
            }
        });
    }

    Ok(())
}

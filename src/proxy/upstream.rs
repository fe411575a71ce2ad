//! Request forwarding
//!
//! This module picks a backend for each inbound request, points the request
//! at it and relays whatever the backend answers. Any failure becomes a fixed
//! 502; no other backend is tried.

use crate::http::request::Request;
use crate::http::response::Response;
use crate::logging::LogSwitch;
use crate::proxy::backend::BackendTarget;
use crate::proxy::selector::Selector;
use std::sync::Arc;

/// Handles proxying requests to backend servers
#[derive(Debug)]
pub struct ProxyHandler {
    selector: Arc<Selector>,
    log: LogSwitch,
}

impl ProxyHandler {
    /// Create a new proxy handler
    pub fn new(selector: Arc<Selector>, log: LogSwitch) -> Self {
        Self { selector, log }
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    /// Forward an HTTP request to the next backend
    ///
    /// This function:
    /// 1. Selects the next backend round-robin
    /// 2. Rewrites the Host header to the backend
    /// 3. Sends the request through that backend's client
    /// 4. Returns the backend response unchanged, or a 502 on failure
    pub async fn forward_request(&self, mut request: Request) -> Response {
        let backend = self.selector.next();

        if self.log.is_enabled() {
            tracing::debug!(
                backend = %backend.target,
                method = %request.method,
                path = %request.path,
                "forwarding request"
            );
        }

        rewrite_host(&mut request, &backend.target);

        match backend.client.forward(&request).await {
            Ok(response) => response,
            Err(e) => {
                if self.log.is_enabled() {
                    tracing::error!(
                        error = %e,
                        backend = %backend.target,
                        method = %request.method,
                        path = %request.path,
                        "error forwarding request"
                    );
                }
                Response::bad_gateway()
            }
        }
    }
}

/// Point the request at `target` by rewriting its Host header in place.
///
/// Everything else about the request is left as received.
pub fn rewrite_host(request: &mut Request, target: &BackendTarget) {
    request.headers.set("Host", target.host_header());
}

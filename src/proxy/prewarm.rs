//! Connection pre-warming
//!
//! Opens connections to every backend before the listener starts so first
//! requests don't pay for TCP/TLS handshakes. Failures are only logged; a
//! backend that fails its probes stays in rotation.

use crate::logging::LogSwitch;
use crate::proxy::backend::{Backend, BackendTable};
use futures_util::future::join_all;

/// Outcome of pre-warming one backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrewarmReport {
    pub backend: String,
    pub succeeded: usize,
    pub failed: usize,
}

/// Probe every backend `requests_per_backend` times concurrently and wait for
/// all probes to finish.
pub async fn prewarm(
    backends: &BackendTable,
    requests_per_backend: usize,
    log: LogSwitch,
) -> Vec<PrewarmReport> {
    join_all(
        backends
            .iter()
            .map(|backend| prewarm_backend(backend, requests_per_backend, log)),
    )
    .await
}

async fn prewarm_backend(backend: &Backend, count: usize, log: LogSwitch) -> PrewarmReport {
    let results = join_all((0..count).map(|_| backend.client.probe())).await;

    let mut report = PrewarmReport {
        backend: backend.target.to_string(),
        succeeded: 0,
        failed: 0,
    };

    for result in results {
        match result {
            Ok(_) => report.succeeded += 1,
            Err(e) => {
                report.failed += 1;
                if log.is_enabled() {
                    tracing::warn!(
                        backend = %backend.target,
                        error = %e,
                        "failed to pre-warm connection"
                    );
                }
            }
        }
    }

    if log.is_enabled() {
        tracing::info!(
            backend = %backend.target,
            count,
            succeeded = report.succeeded,
            failed = report.failed,
            "pre-warmed connections"
        );
    }

    report
}

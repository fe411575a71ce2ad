//! Round-robin backend selection.

use crate::proxy::backend::{Backend, BackendTable};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free round-robin cursor over the backend table.
///
/// Every call takes exactly one cursor value; the value modulo the table size
/// is the backend index. Failing backends keep their turn.
#[derive(Debug)]
pub struct Selector {
    backends: Arc<BackendTable>,
    cursor: AtomicU64,
}

impl Selector {
    pub fn new(backends: Arc<BackendTable>) -> Self {
        Self {
            backends,
            cursor: AtomicU64::new(0),
        }
    }

    /// Pick the next backend.
    pub fn next(&self) -> &Backend {
        &self.backends[self.next_index()]
    }

    /// Take one cursor value and map it to a table index.
    pub fn next_index(&self) -> usize {
        let ticket = self.cursor.fetch_add(1, Ordering::Relaxed);
        (ticket % self.backends.len() as u64) as usize
    }

    /// Number of selections made so far
    pub fn cursor(&self) -> u64 {
        self.cursor.load(Ordering::Relaxed)
    }

    pub fn backends(&self) -> &Arc<BackendTable> {
        &self.backends
    }
}

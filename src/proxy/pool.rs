//! Bounded pool of reusable backend connections
//!
//! The pool is generic over the connection type so the reuse and eviction
//! policy can be exercised without sockets. A [`Lease`] is either a reused
//! idle connection or a vacant slot the caller fills by dialing. Open
//! connections (idle or leased) never exceed `max_connections`.
//!
//! Dropping a lease closes its connection; [`Lease::release`] hands it back
//! for reuse.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::time::Instant;

/// Reuse policy of a pool
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Maximum open connections, idle and leased together
    pub max_connections: usize,
    /// How long a released connection may sit idle before it is discarded
    pub max_idle_duration: Duration,
    /// How long a connection may live since it was dialed
    pub max_lifetime: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// No connection was released within the wait budget
    Exhausted,
}

struct Idle<T> {
    conn: T,
    created: Instant,
    idle_since: Instant,
    permit: OwnedSemaphorePermit,
}

struct Shared<T> {
    config: PoolConfig,
    idle: Mutex<Vec<Idle<T>>>,
    permits: Arc<Semaphore>,
    available: Notify,
}

impl<T> Shared<T> {
    fn idle(&self) -> MutexGuard<'_, Vec<Idle<T>>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_expired(&self, created: Instant, idle_since: Instant, now: Instant) -> bool {
        now.duration_since(idle_since) >= self.config.max_idle_duration
            || now.duration_since(created) >= self.config.max_lifetime
    }
}

/// Connection pool for a single backend
pub struct Pool<T> {
    shared: Arc<Shared<T>>,
}

impl<T> std::fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.shared.config)
            .field("idle", &self.idle_count())
            .field("open", &self.open_count())
            .finish()
    }
}

impl<T> Pool<T> {
    pub fn new(config: PoolConfig) -> Self {
        let max = config.max_connections.max(1);
        Self {
            shared: Arc::new(Shared {
                config,
                idle: Mutex::new(Vec::new()),
                permits: Arc::new(Semaphore::new(max)),
                available: Notify::new(),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Check out the most recently released live connection, or a vacant
    /// slot if none is idle and the pool is under capacity. Waits up to
    /// `wait` for a connection to be released when the pool is full.
    pub async fn acquire(&self, wait: Duration) -> Result<Lease<T>, PoolError> {
        self.acquire_inner(wait, true).await
    }

    /// Like [`Pool::acquire`] but never hands out an idle connection, so the
    /// caller always dials a fresh one.
    pub async fn acquire_vacant(&self, wait: Duration) -> Result<Lease<T>, PoolError> {
        self.acquire_inner(wait, false).await
    }

    async fn acquire_inner(&self, wait: Duration, reuse: bool) -> Result<Lease<T>, PoolError> {
        let deadline = Instant::now() + wait;

        loop {
            let notified = self.shared.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if reuse {
                if let Some(lease) = self.checkout_idle() {
                    return Ok(lease);
                }
            } else {
                // Expired idle connections hold permits a fresh dial may need
                self.evict_expired();
            }

            match self.shared.permits.clone().try_acquire_owned() {
                Ok(permit) => return Ok(Lease::vacant(self.shared.clone(), permit)),
                Err(TryAcquireError::NoPermits) if !reuse => {
                    // Give up the oldest idle connection to make room
                    if let Some(idle) = self.pop_oldest_idle() {
                        drop(idle.conn);
                        return Ok(Lease::vacant(self.shared.clone(), idle.permit));
                    }
                }
                Err(_) => {}
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(PoolError::Exhausted);
            }
        }
    }

    fn checkout_idle(&self) -> Option<Lease<T>> {
        let now = Instant::now();
        let mut idle = self.shared.idle();

        while let Some(entry) = idle.pop() {
            if self.shared.is_expired(entry.created, entry.idle_since, now) {
                continue;
            }
            return Some(Lease {
                conn: Some(entry.conn),
                created: entry.created,
                reused: true,
                permit: Some(entry.permit),
                shared: self.shared.clone(),
            });
        }
        None
    }

    fn pop_oldest_idle(&self) -> Option<Idle<T>> {
        let mut idle = self.shared.idle();
        if idle.is_empty() {
            None
        } else {
            Some(idle.remove(0))
        }
    }

    /// Drop idle connections past their idle duration or lifetime.
    /// Returns how many were dropped.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let evicted = {
            let mut idle = self.shared.idle();
            let before = idle.len();
            idle.retain(|entry| !self.shared.is_expired(entry.created, entry.idle_since, now));
            before - idle.len()
        };
        if evicted > 0 {
            self.shared.available.notify_waiters();
        }
        evicted
    }

    /// Remove every idle connection from the pool and hand them to the caller
    /// for closing. Leased connections are unaffected.
    pub fn drain_idle(&self) -> Vec<T> {
        let drained: Vec<T> = self
            .shared
            .idle()
            .drain(..)
            .map(|entry| entry.conn)
            .collect();
        self.shared.available.notify_waiters();
        drained
    }

    pub fn idle_count(&self) -> usize {
        self.shared.idle().len()
    }

    /// Open connections, idle and leased
    pub fn open_count(&self) -> usize {
        self.shared.config.max_connections.max(1) - self.shared.permits.available_permits()
    }
}

/// A checked-out pool slot
pub struct Lease<T> {
    conn: Option<T>,
    created: Instant,
    reused: bool,
    permit: Option<OwnedSemaphorePermit>,
    shared: Arc<Shared<T>>,
}

impl<T> Lease<T> {
    fn vacant(shared: Arc<Shared<T>>, permit: OwnedSemaphorePermit) -> Self {
        Self {
            conn: None,
            created: Instant::now(),
            reused: false,
            permit: Some(permit),
            shared,
        }
    }

    /// Whether the lease carries a previously used connection
    pub fn is_reused(&self) -> bool {
        self.reused
    }

    /// Fill a vacant lease with a freshly dialed connection
    pub fn attach(&mut self, conn: T) {
        self.created = Instant::now();
        self.conn = Some(conn);
    }

    /// Close the held connection and turn the lease back into a vacant slot
    /// that keeps its permit.
    pub fn discard(&mut self) {
        self.conn.take();
        self.reused = false;
    }

    pub fn conn_mut(&mut self) -> Option<&mut T> {
        self.conn.as_mut()
    }

    /// Return the connection to the pool for reuse. Connections past their
    /// lifetime are closed instead.
    pub fn release(mut self) {
        let now = Instant::now();
        let (Some(conn), Some(permit)) = (self.conn.take(), self.permit.take()) else {
            return;
        };
        if now.duration_since(self.created) >= self.shared.config.max_lifetime {
            drop(conn);
            drop(permit);
            return;
        }

        self.shared.idle().push(Idle {
            conn,
            created: self.created,
            idle_since: now,
            permit,
        });
    }
}

impl<T> Drop for Lease<T> {
    fn drop(&mut self) {
        // Closes the connection (if still held) and frees the slot
        self.conn.take();
        self.permit.take();
        self.shared.available.notify_one();
    }
}

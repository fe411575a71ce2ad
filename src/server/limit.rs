//! Per-client-IP connection cap.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Counts open inbound connections per client IP
#[derive(Debug)]
pub struct IpLimiter {
    /// 0 disables the cap
    max_per_ip: usize,
    open: Mutex<HashMap<IpAddr, usize>>,
}

/// Holds one connection slot for an IP until dropped
#[derive(Debug)]
pub struct IpGuard {
    limiter: Option<Arc<IpLimiter>>,
    ip: IpAddr,
}

impl IpLimiter {
    pub fn new(max_per_ip: usize) -> Arc<Self> {
        Arc::new(Self {
            max_per_ip,
            open: Mutex::new(HashMap::new()),
        })
    }

    /// Take a slot for `ip`, or `None` if the IP is at its cap.
    pub fn try_acquire(self: &Arc<Self>, ip: IpAddr) -> Option<IpGuard> {
        if self.max_per_ip == 0 {
            return Some(IpGuard { limiter: None, ip });
        }

        let mut open = self.open();
        let count = open.entry(ip).or_insert(0);
        if *count >= self.max_per_ip {
            return None;
        }
        *count += 1;

        Some(IpGuard {
            limiter: Some(Arc::clone(self)),
            ip,
        })
    }

    /// Open connections currently counted for `ip`
    pub fn open_for(&self, ip: IpAddr) -> usize {
        self.open().get(&ip).copied().unwrap_or(0)
    }

    fn open(&self) -> MutexGuard<'_, HashMap<IpAddr, usize>> {
        self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, ip: IpAddr) {
        let mut open = self.open();
        if let Some(count) = open.get_mut(&ip) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                open.remove(&ip);
            }
        }
    }
}

impl Drop for IpGuard {
    fn drop(&mut self) {
        if let Some(limiter) = self.limiter.take() {
            limiter.release(self.ip);
        }
    }
}

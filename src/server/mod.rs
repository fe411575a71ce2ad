//! Inbound side of the proxy: accept loop, per-IP limits and lifecycle.

pub mod lifecycle;
pub mod limit;
pub mod listener;

pub use lifecycle::{LifecycleState, Proxy};

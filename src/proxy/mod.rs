//! Reverse proxy functionality
//!
//! This module implements the core reverse proxy logic: backend descriptors,
//! per-backend connection pools and clients, round-robin selection,
//! pre-warming and request forwarding.

pub mod backend;
pub mod client;
pub mod pool;
pub mod prewarm;
pub mod selector;
pub mod transport;
pub mod upstream;

pub use backend::{Backend, BackendTable, BackendTarget, TransportMode};
pub use client::{BackendClient, ClientSettings};
pub use prewarm::PrewarmReport;
pub use selector::Selector;
pub use upstream::ProxyHandler;

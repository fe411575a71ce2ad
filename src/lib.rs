//! sluice - round-robin HTTP reverse proxy
//!
//! Core library for HTTP and proxy functionality.

pub mod config;
pub mod error;
pub mod http;
pub mod logging;
pub mod proxy;
pub mod server;

pub use config::Config;
pub use error::{BackendError, ProxyError};
pub use logging::LogSwitch;
pub use server::{LifecycleState, Proxy};

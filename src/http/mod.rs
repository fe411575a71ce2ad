//! HTTP protocol implementation.
//!
//! A small HTTP/1.1 codec shared by the inbound side (clients talking to the
//! proxy) and the outbound side (the proxy talking to backends).
//!
//! # Architecture
//!
//! - **`connection`**: The inbound connection handler implementing the request-response state machine
//! - **`headers`**: Ordered, case-preserving header list
//! - **`parser`**: Parses requests, response heads and chunked bodies from byte buffers
//! - **`request`**: HTTP request representation
//! - **`response`**: HTTP response representation with builder pattern
//! - **`writer`**: Serializes requests and responses
//!
//! # Connection State Machine
//!
//! Each client connection goes through a state machine:
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← Wait for incoming request data
//!        └──────┬──────┘
//!               │ Request received
//!               ▼
//!        ┌──────────────────┐
//!        │   Processing     │ ← Forward to a backend
//!        └──────┬───────────┘
//!               │ Response ready
//!               ▼
//!        ┌──────────────────┐
//!        │    Writing       │ ← Send response to client
//!        └──────┬───────────┘
//!               │ Response sent
//!               ├─ Keep-Alive → Reading (same connection)
//!               └─ Close → Closed
//! ```

pub mod connection;
pub mod headers;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;

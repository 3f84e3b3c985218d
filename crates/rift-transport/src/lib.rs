//! Transport core of the Rift HTTP mock server.
//!
//! - [`fault`] corrupts live connections on demand (reset, empty reply,
//!   malformed chunk, noise).
//! - [`proxy`] tunnels browser `CONNECT` requests to a local TLS listener and
//!   classifies how each request arrived.
//! - [`multipart`] parses buffered multipart payloads into parts.
//! - [`server`] hosts all of the above behind the [`server::RequestHandler`]
//!   seam.

pub mod config;
pub mod connection;
pub mod fault;
pub mod multipart;
pub mod proxy;
pub mod server;

pub use fault::{FaultCommand, FaultInjector};
pub use server::{HttpServer, RequestHandler};

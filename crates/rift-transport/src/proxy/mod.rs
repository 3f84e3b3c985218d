//! Browser-proxy support.
//!
//! # Module Structure
//!
//! - `tunnel` - CONNECT handling that splices clients onto the MITM listener
//! - `classifier` - tags each request with how it arrived
//! - `context` - the per-request classification result
//! - `headers` - response headers exposing the classification
//! - `tls` - certificate loading for the TLS listeners
//! - `network` - listener creation (SO_REUSEPORT)

mod classifier;
mod context;
pub mod headers;
pub mod network;
pub mod tls;
mod tunnel;

pub use classifier::{target_port, ProxyClassifier};
pub use context::ProxyRequestContext;
pub use tunnel::{ProxyTunnel, TunnelError, TunnelTarget};

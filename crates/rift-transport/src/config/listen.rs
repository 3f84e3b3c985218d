//! Listener, TLS and timeout configuration.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// TLS material for a TLS listener
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to TLS certificate file (PEM format)
    pub cert_path: String,
    /// Path to TLS private key file (PEM format)
    pub key_path: String,
}

/// Plain HTTP listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// 0 = ephemeral port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Number of worker threads (0 = auto-detect CPU count)
    #[serde(default)]
    pub workers: usize,
    /// The plain listener can be switched off when only HTTPS is wanted
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_enabled() -> bool {
    true
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            workers: 0,
            enabled: default_enabled(),
        }
    }
}

impl ListenConfig {
    pub fn bind_ip(&self) -> Result<IpAddr, anyhow::Error> {
        self.bind_address
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid bind address '{}': {e}", self.bind_address))
    }

    /// Socket address for `port` on the configured bind address.
    pub fn socket_addr(&self, port: u16) -> Result<SocketAddr, anyhow::Error> {
        Ok(SocketAddr::new(self.bind_ip()?, port))
    }
}

/// HTTPS listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpsConfig {
    /// 0 = ephemeral port
    #[serde(default)]
    pub port: u16,
    pub tls: TlsConfig,
}

/// Browser-proxy mode: CONNECT on the HTTP listener is tunnelled to a local
/// TLS listener that terminates the browser's HTTPS traffic.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BrowserProxyConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Port of the MITM listener (0 = ephemeral)
    #[serde(default)]
    pub mitm_port: u16,
    /// Host the tunnel connects to (default "localhost")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Certificate presented to proxied browsers (required when enabled)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimeoutConfig {
    /// Time allowed for a request head to arrive on an idle connection
    #[serde(default = "default_idle_ms")]
    pub idle_ms: u64,
    /// Time `stop()` waits for listeners and connections to wind down
    #[serde(default = "default_stop_ms")]
    pub stop_ms: u64,
}

fn default_idle_ms() -> u64 {
    30_000
}

fn default_stop_ms() -> u64 {
    1_000
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            idle_ms: default_idle_ms(),
            stop_ms: default_stop_ms(),
        }
    }
}

impl TimeoutConfig {
    pub fn idle(&self) -> Duration {
        Duration::from_millis(self.idle_ms)
    }

    pub fn stop(&self) -> Duration {
        Duration::from_millis(self.stop_ms)
    }
}

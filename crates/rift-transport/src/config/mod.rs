//! Configuration types for the Rift transport server.

mod faults;
mod listen;

use std::path::Path;

use serde::{Deserialize, Serialize};

pub use faults::FaultRoute;
pub use listen::{BrowserProxyConfig, HttpsConfig, ListenConfig, TimeoutConfig, TlsConfig};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub listen: ListenConfig,

    /// Optional HTTPS listener alongside the plain one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https: Option<HttpsConfig>,

    #[serde(default)]
    pub browser_proxy: BrowserProxyConfig,

    /// Strict header mode: response header names are written as stored
    /// (lowercase). Disabling it title-cases them for legacy clients.
    #[serde(default = "default_strict_headers")]
    pub strict_headers: bool,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Path prefixes answered with a connection fault by the default handler
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fault_routes: Vec<FaultRoute>,
}

fn default_strict_headers() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: ListenConfig::default(),
            https: None,
            browser_proxy: BrowserProxyConfig::default(),
            strict_headers: default_strict_headers(),
            timeouts: TimeoutConfig::default(),
            fault_routes: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let contents = std::fs::read_to_string(path)?;
        let config: ServerConfig = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.listen.bind_ip()?;

        if !self.listen.enabled && self.https.is_none() && !self.browser_proxy.enabled {
            anyhow::bail!(
                "No listener enabled. Enable 'listen', configure 'https', or enable 'browser_proxy'"
            );
        }

        if self.browser_proxy.enabled {
            if self.browser_proxy.tls.is_none() {
                anyhow::bail!(
                    "TLS configuration is required when browser proxying is enabled. \
                     Please provide 'browser_proxy.tls.cert_path' and 'browser_proxy.tls.key_path'"
                );
            }
            if !self.listen.enabled {
                anyhow::bail!(
                    "Browser proxying needs the plain HTTP listener to receive CONNECT requests"
                );
            }
        }

        if let Some(https) = &self.https {
            if https.tls.cert_path.is_empty() || https.tls.key_path.is_empty() {
                anyhow::bail!("'https.tls.cert_path' and 'https.tls.key_path' must not be empty");
            }
        }

        for route in &self.fault_routes {
            if !route.path_prefix.starts_with('/') {
                anyhow::bail!(
                    "Fault route prefix '{}' must start with '/'",
                    route.path_prefix
                );
            }
        }

        if self.timeouts.idle_ms == 0 {
            anyhow::bail!("'timeouts.idle_ms' must be greater than zero");
        }

        Ok(())
    }
}

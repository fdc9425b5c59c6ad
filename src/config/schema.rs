//! Configuration schema definitions.
//!
//! All types derive Serde traits so an embedding application can carry them
//! inside its own configuration, but the listener itself never reads files
//! other than the PEM material named in [`TlsConfig`].

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for a listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address or host name. Empty binds every IPv4 interface.
    pub address: String,

    /// Bind port. `0` asks the OS for an ephemeral port.
    pub port: u16,

    /// Certificate material. Required for the TLS transport.
    pub tls: Option<TlsConfig>,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Maximum live sessions (backpressure).
    pub max_connections: usize,

    /// Set `SO_REUSEADDR` on the listening socket.
    pub reuse_address: bool,

    /// Listen backlog.
    pub backlog: u32,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            port: 443,
            tls: None,
            timeouts: TimeoutConfig::default(),
            max_connections: 10_000,
            reuse_address: true,
            backlog: 1024,
        }
    }
}

impl ListenerConfig {
    /// Convenience constructor for a fixed address and port.
    pub fn bind(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            ..Self::default()
        }
    }

    /// Attach certificate material.
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Override the request-phase deadline.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.request_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }
}

/// Certificate material for the TLS transport.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to the certificate chain (PEM), leaf first.
    pub cert_path: PathBuf,

    /// Path to the private key (PEM).
    pub key_path: PathBuf,

    /// Optional trust store (PEM). When present, clients must present a
    /// certificate issued by one of these roots.
    #[serde(default)]
    pub verify_path: Option<PathBuf>,
}

impl TlsConfig {
    pub fn new(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
            verify_path: None,
        }
    }

    /// Require client certificates issued by the roots in `verify_path`.
    pub fn with_verify_path(mut self, verify_path: impl Into<PathBuf>) -> Self {
        self.verify_path = Some(verify_path.into());
        self
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request-phase deadline in milliseconds. Bounds the TLS handshake.
    /// `0` disables the deadline.
    pub request_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_ms: 5_000 }
    }
}

impl TimeoutConfig {
    pub fn request(&self) -> Duration {
        Duration::from_millis(self.request_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_https() {
        let config = ListenerConfig::default();
        assert_eq!(config.port, 443);
        assert!(config.address.is_empty());
        assert!(config.tls.is_none());
        assert_eq!(config.timeouts.request(), Duration::from_secs(5));
    }

    #[test]
    fn request_timeout_round_trips_through_millis() {
        let config = ListenerConfig::bind("127.0.0.1", 0)
            .with_request_timeout(Duration::from_millis(250));
        assert_eq!(config.timeouts.request_ms, 250);
        assert_eq!(config.timeouts.request(), Duration::from_millis(250));
    }
}

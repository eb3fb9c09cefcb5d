//! Network configuration types for the gateway.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level network configuration for the gateway server.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Bind address for the server.
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub port: u16,
    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,
    /// Allowed CORS origins.
    pub cors_origins: Vec<String>,
    /// Maximum time to wait for a request to complete.
    pub request_timeout: Duration,
    /// Bind address for the Prometheus exporter. `None` disables the
    /// exporter (metric emissions become no-ops without a recorder).
    pub metrics_listen: Option<SocketAddr>,
    /// Maximum time to wait for in-flight requests during shutdown.
    pub drain_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
            tls: None,
            cors_origins: vec!["*".to_string()],
            request_timeout: Duration::from_secs(30),
            metrics_listen: None,
            drain_timeout: Duration::from_secs(30),
        }
    }
}

/// TLS certificate configuration.
///
/// No `Default` impl because certificate paths have no sensible defaults.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Path to the TLS certificate file.
    pub cert_path: PathBuf,
    /// Path to the TLS private key file.
    pub key_path: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_config_defaults() {
        let config = NetworkConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 0);
        assert!(config.tls.is_none());
        assert!(config.metrics_listen.is_none());
        assert_eq!(config.cors_origins, vec!["*"]);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.drain_timeout, Duration::from_secs(30));
    }

    #[test]
    fn tls_config_constructs_from_paths() {
        let tls = TlsConfig {
            cert_path: PathBuf::from("/etc/gateway/cert.pem"),
            key_path: PathBuf::from("/etc/gateway/key.pem"),
        };
        assert_eq!(tls.cert_path, PathBuf::from("/etc/gateway/cert.pem"));
    }
}

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Broker configuration.
///
/// The TCP listener and the local (Unix socket) endpoint are always both
/// enabled; clients on either transport are indistinguishable to the router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Address the TCP listener binds to.
    pub host: String,
    /// TCP port. Port 0 binds an ephemeral port, useful in tests.
    pub port: u16,
    /// Name of the local IPC endpoint; resolved to a socket path under the
    /// system temporary directory.
    pub local_name: String,
    /// Per-topic recent-message cache bound. 0 disables caching.
    pub cache_size: usize,
    /// How often the liveness sweeper scans the registry.
    pub sweep_interval: Duration,
    /// Idle time after which a client is evicted as disconnected.
    pub max_idle: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5555,
            local_name: "MyMQLocalServer".to_string(),
            cache_size: 100,
            sweep_interval: Duration::from_secs(30),
            max_idle: Duration::from_secs(60),
        }
    }
}

impl BrokerConfig {
    /// Filesystem path of the local IPC endpoint for this configuration.
    pub fn local_socket_path(&self) -> PathBuf {
        local_socket_path(&self.local_name)
    }
}

/// Resolve a local endpoint name to its socket path. Shared by the broker
/// (bind) and the client library (connect) so both sides agree.
pub fn local_socket_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BrokerConfig::default();
        assert_eq!(config.port, 5555);
        assert_eq!(config.local_name, "MyMQLocalServer");
        assert_eq!(config.cache_size, 100);
        assert_eq!(config.sweep_interval, Duration::from_secs(30));
        assert_eq!(config.max_idle, Duration::from_secs(60));
    }

    #[test]
    fn test_local_socket_path_is_name_scoped() {
        let a = local_socket_path("broker-a");
        let b = local_socket_path("broker-b");
        assert_ne!(a, b);
        assert!(a.ends_with("broker-a"));
    }
}

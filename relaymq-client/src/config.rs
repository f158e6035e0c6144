//! Configuration types for RelayMQ clients

use std::path::PathBuf;
use std::time::Duration;

/// Which transport a client uses to reach the broker. Setting a local
/// endpoint name selects the Unix-socket transport in preference to TCP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    /// TCP to `host:port`.
    Tcp { host: String, port: u16 },
    /// Local Unix-socket endpoint under the given name.
    Local { name: String },
}

/// Client configuration shared by publishers and subscribers.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Broker host for the TCP transport.
    pub host: String,
    /// Broker TCP port.
    pub port: u16,
    /// Local endpoint name; when set, the client connects over the Unix
    /// socket instead of TCP.
    pub local_name: Option<String>,
    /// Timeout for a single connection attempt.
    pub connect_timeout: Duration,
    /// Reconnect automatically after a disconnect or failed connect.
    pub auto_reconnect: bool,
    /// Delay between reconnect attempts.
    pub reconnect_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5555,
            local_name: None,
            connect_timeout: Duration::from_millis(1000),
            auto_reconnect: false,
            reconnect_interval: Duration::from_millis(5000),
        }
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// The transport this configuration selects.
    pub fn transport(&self) -> Transport {
        match &self.local_name {
            Some(name) => Transport::Local { name: name.clone() },
            None => Transport::Tcp {
                host: self.host.clone(),
                port: self.port,
            },
        }
    }

    /// Socket path of the local endpoint, when the local transport is
    /// selected. Matches the broker's resolution of the same name.
    pub fn local_socket_path(&self) -> Option<PathBuf> {
        self.local_name
            .as_deref()
            .map(relaymq::config::local_socket_path)
    }
}

/// Builder for [`ClientConfig`]
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Set the broker host for TCP connections
    pub fn host<S: Into<String>>(mut self, host: S) -> Self {
        self.config.host = host.into();
        self
    }

    /// Set the broker TCP port
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Select the local Unix-socket transport by endpoint name
    pub fn local_name<S: Into<String>>(mut self, name: S) -> Self {
        self.config.local_name = Some(name.into());
        self
    }

    /// Set the per-attempt connection timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Enable or disable automatic reconnection
    pub fn auto_reconnect(mut self, enable: bool) -> Self {
        self.config.auto_reconnect = enable;
        self
    }

    /// Set the delay between reconnect attempts
    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.config.reconnect_interval = interval;
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_selects_tcp() {
        let config = ClientConfig::default();
        assert_eq!(
            config.transport(),
            Transport::Tcp {
                host: "localhost".to_string(),
                port: 5555
            }
        );
        assert!(config.local_socket_path().is_none());
    }

    #[test]
    fn test_local_name_prefers_ipc() {
        let config = ClientConfig::builder()
            .host("ignored")
            .local_name("MyMQLocalServer")
            .build();
        assert_eq!(
            config.transport(),
            Transport::Local {
                name: "MyMQLocalServer".to_string()
            }
        );
        assert!(config
            .local_socket_path()
            .unwrap()
            .ends_with("MyMQLocalServer"));
    }

    #[test]
    fn test_builder_round_trip() {
        let config = ClientConfig::builder()
            .host("broker.internal")
            .port(7777)
            .auto_reconnect(true)
            .reconnect_interval(Duration::from_millis(250))
            .build();
        assert_eq!(config.host, "broker.internal");
        assert_eq!(config.port, 7777);
        assert!(config.auto_reconnect);
        assert_eq!(config.reconnect_interval, Duration::from_millis(250));
    }
}

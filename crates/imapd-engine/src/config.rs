//! Server configuration.

use std::time::Duration;

/// Configuration for the listener and every connection it accepts.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind.
    pub host: String,
    /// Port to bind.
    pub port: u16,
    /// Maximum number of concurrent connections.
    pub max_connections: usize,
    /// Maximum length of one physical command line, CRLF included.
    pub max_line_length: usize,
    /// Maximum length of one literal argument.
    pub max_literal_length: usize,
    /// Disconnect after this long without a complete command.
    pub idle_timeout: Duration,
    /// Maximum time one handler invocation may take.
    pub command_timeout: Duration,
    /// Maximum time to wait for promised literal bytes.
    pub literal_timeout: Duration,
    /// Hard cap on connection lifetime; `None` disables it.
    pub max_connection_lifetime: Option<Duration>,
    /// Pause inbound reads while this many unconsumed bytes are buffered.
    pub read_watermark: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 143,
            max_connections: 1024,
            max_line_length: 8 * 1024,
            max_literal_length: 64 * 1024 * 1024,
            idle_timeout: Duration::from_secs(30 * 60),
            command_timeout: Duration::from_secs(60),
            literal_timeout: Duration::from_secs(60),
            max_connection_lifetime: None,
            read_watermark: 64 * 1024,
        }
    }
}

impl ServerConfig {
    /// Creates a configuration with defaults for the given bind address.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Creates a configuration builder.
    #[must_use]
    pub fn builder(host: impl Into<String>, port: u16) -> ServerConfigBuilder {
        ServerConfigBuilder {
            config: Self::new(host, port),
        }
    }
}

/// Builder for [`ServerConfig`].
#[derive(Debug, Clone)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    /// Sets the maximum number of concurrent connections.
    #[must_use]
    pub const fn max_connections(mut self, n: usize) -> Self {
        self.config.max_connections = n;
        self
    }

    /// Sets the maximum physical line length.
    #[must_use]
    pub const fn max_line_length(mut self, n: usize) -> Self {
        self.config.max_line_length = n;
        self
    }

    /// Sets the maximum literal length.
    #[must_use]
    pub const fn max_literal_length(mut self, n: usize) -> Self {
        self.config.max_literal_length = n;
        self
    }

    /// Sets the idle timeout.
    #[must_use]
    pub const fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Sets the per-command handler timeout.
    #[must_use]
    pub const fn command_timeout(mut self, timeout: Duration) -> Self {
        self.config.command_timeout = timeout;
        self
    }

    /// Sets the literal completion timeout.
    #[must_use]
    pub const fn literal_timeout(mut self, timeout: Duration) -> Self {
        self.config.literal_timeout = timeout;
        self
    }

    /// Sets the hard connection lifetime cap.
    #[must_use]
    pub const fn max_connection_lifetime(mut self, lifetime: Duration) -> Self {
        self.config.max_connection_lifetime = Some(lifetime);
        self
    }

    /// Sets the inbound read watermark.
    #[must_use]
    pub const fn read_watermark(mut self, n: usize) -> Self {
        self.config.read_watermark = n;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> ServerConfig {
        self.config
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ServerConfig::new("0.0.0.0", 1143);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 1143);
        assert_eq!(config.max_line_length, 8 * 1024);
        assert!(config.max_connection_lifetime.is_none());
    }

    #[test]
    fn builder() {
        let config = ServerConfig::builder("::1", 143)
            .max_connections(16)
            .max_line_length(1024)
            .max_literal_length(4096)
            .idle_timeout(Duration::from_secs(5))
            .command_timeout(Duration::from_secs(2))
            .max_connection_lifetime(Duration::from_secs(3600))
            .build();

        assert_eq!(config.max_connections, 16);
        assert_eq!(config.max_line_length, 1024);
        assert_eq!(config.max_literal_length, 4096);
        assert_eq!(config.idle_timeout, Duration::from_secs(5));
        assert_eq!(config.command_timeout, Duration::from_secs(2));
        assert_eq!(
            config.max_connection_lifetime,
            Some(Duration::from_secs(3600))
        );
    }
}

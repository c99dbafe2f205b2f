//! Connection configuration types.

/// Highest TLS protocol version the client will negotiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    /// TLS 1.2
    Tls12,
    /// TLS 1.3
    Tls13,
}

/// IMAP connection configuration.
#[derive(Clone)]
pub struct ConnectionConfig {
    /// Server hostname.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Login username.
    pub username: String,
    /// Login password.
    pub password: String,
    /// Wrap the TCP connection in TLS from the start.
    pub use_ssl: bool,
    /// Verify the server certificate chain and hostname.
    pub verify_certificate: bool,
    /// Cap on the negotiated TLS version; `None` allows every supported version.
    pub tls_maximum_version: Option<TlsVersion>,
}

impl ConnectionConfig {
    /// Creates a configuration with implicit TLS on port 993.
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self::builder(host, username, password).build()
    }

    /// Creates a configuration builder.
    #[must_use]
    pub fn builder(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::new(host, username, password)
    }
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("use_ssl", &self.use_ssl)
            .field("verify_certificate", &self.verify_certificate)
            .field("tls_maximum_version", &self.tls_maximum_version)
            .finish()
    }
}

/// Builder for connection configuration.
#[derive(Clone)]
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    /// Creates a new builder with default settings.
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            config: ConnectionConfig {
                host: host.into(),
                port: 993,
                username: username.into(),
                password: password.into(),
                use_ssl: true,
                verify_certificate: true,
                tls_maximum_version: None,
            },
        }
    }

    /// Sets the port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Enables or disables TLS.
    #[must_use]
    pub const fn use_ssl(mut self, use_ssl: bool) -> Self {
        self.config.use_ssl = use_ssl;
        self
    }

    /// Enables or disables certificate verification.
    #[must_use]
    pub const fn verify_certificate(mut self, verify: bool) -> Self {
        self.config.verify_certificate = verify;
        self
    }

    /// Caps the negotiated TLS version.
    #[must_use]
    pub const fn tls_maximum_version(mut self, version: Option<TlsVersion>) -> Self {
        self.config.tls_maximum_version = version;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> ConnectionConfig {
        self.config
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ConnectionConfig::new("imap.example.com", "dmarc", "secret");
        assert_eq!(config.host, "imap.example.com");
        assert_eq!(config.port, 993);
        assert!(config.use_ssl);
        assert!(config.verify_certificate);
        assert_eq!(config.tls_maximum_version, None);
    }

    #[test]
    fn test_config_builder() {
        let config = ConnectionConfig::builder("localhost", "dmarc", "secret")
            .port(3143)
            .use_ssl(false)
            .verify_certificate(false)
            .tls_maximum_version(Some(TlsVersion::Tls12))
            .build();

        assert_eq!(config.port, 3143);
        assert!(!config.use_ssl);
        assert!(!config.verify_certificate);
        assert_eq!(config.tls_maximum_version, Some(TlsVersion::Tls12));
    }

    #[test]
    fn test_debug_hides_password() {
        let config = ConnectionConfig::new("imap.example.com", "dmarc", "hunter2");
        let debug = format!("{config:?}");
        assert!(debug.contains("dmarc"));
        assert!(!debug.contains("hunter2"));
    }
}

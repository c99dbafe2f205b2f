//! Exporter configuration file.
//!
//! The configuration is a single JSON document. Only the `imap` section is
//! required; everything else has a default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use dmarc_imap::{ConnectionConfig, QueueFolders, TlsVersion};
use serde::Deserialize;

use crate::{Error, Result};

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/dmarc-metrics-exporter.json";

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Configuration {
    /// Address the metrics endpoint binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Port of the metrics endpoint.
    #[serde(default = "default_port")]
    pub port: u16,
    /// IMAP account holding the reports.
    pub imap: ImapSettings,
    /// Folders used as work queue.
    #[serde(default)]
    pub folders: FolderSettings,
    /// Seconds between two mailbox polls.
    #[serde(default = "default_interval")]
    pub poll_interval_seconds: u64,
    /// IMAP inactivity timeout in seconds.
    #[serde(default = "default_interval")]
    pub timeout_seconds: u64,
    /// Directory for persisted metrics and seen reports.
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,
    /// How long a report ID is remembered for deduplication.
    #[serde(default = "default_deduplication_max_seconds")]
    pub deduplication_max_seconds: u64,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// IMAP connection settings.
#[derive(Clone, Deserialize)]
pub struct ImapSettings {
    /// Server hostname.
    pub host: String,
    /// Login name.
    pub username: String,
    /// Login password.
    pub password: String,
    /// Server port.
    #[serde(default = "default_imap_port")]
    pub port: u16,
    /// Use implicit TLS.
    #[serde(default = "default_true")]
    pub use_ssl: bool,
    /// Verify the server certificate.
    #[serde(default = "default_true")]
    pub verify_certificate: bool,
    /// Highest TLS version to negotiate, `"TLSv1_2"` or `"TLSv1_3"`.
    #[serde(default, with = "tls_version_serde")]
    pub tls_maximum_version: Option<TlsVersion>,
}

impl std::fmt::Debug for ImapSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImapSettings")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("port", &self.port)
            .field("use_ssl", &self.use_ssl)
            .field("verify_certificate", &self.verify_certificate)
            .field("tls_maximum_version", &self.tls_maximum_version)
            .finish()
    }
}

/// Serde helpers for `TlsVersion` (it lives in the IMAP crate without serde).
mod tls_version_serde {
    use dmarc_imap::TlsVersion;
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<TlsVersion>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let Some(s) = Option::<String>::deserialize(deserializer)? else {
            return Ok(None);
        };
        match s.as_str() {
            "TLSv1_2" => Ok(Some(TlsVersion::Tls12)),
            "TLSv1_3" => Ok(Some(TlsVersion::Tls13)),
            other => Err(serde::de::Error::custom(format!(
                "unsupported TLS version {other:?}, expected TLSv1_2 or TLSv1_3"
            ))),
        }
    }
}

/// Queue folder names.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FolderSettings {
    /// Folder polled for reports.
    pub inbox: String,
    /// Destination of processed reports.
    pub done: String,
    /// Destination of emails without a usable report.
    pub error: String,
}

impl Default for FolderSettings {
    fn default() -> Self {
        let folders = QueueFolders::default();
        Self {
            inbox: folders.inbox,
            done: folders.done,
            error: folders.error,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// One of `debug`, `info`, `warning`, `error`.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

fn default_listen_addr() -> String {
    "127.0.0.1".to_string()
}

const fn default_port() -> u16 {
    9797
}

const fn default_imap_port() -> u16 {
    993
}

const fn default_true() -> bool {
    true
}

const fn default_interval() -> u64 {
    60
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("/var/lib/dmarc-metrics-exporter")
}

const fn default_deduplication_max_seconds() -> u64 {
    7 * 24 * 60 * 60
}

impl Configuration {
    /// Reads and parses a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&content)
    }

    /// Parses a configuration document.
    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Connection settings for the IMAP client.
    #[must_use]
    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig::builder(&self.imap.host, &self.imap.username, &self.imap.password)
            .port(self.imap.port)
            .use_ssl(self.imap.use_ssl)
            .verify_certificate(self.imap.verify_certificate)
            .tls_maximum_version(self.imap.tls_maximum_version)
            .build()
    }

    /// Queue folders.
    #[must_use]
    pub fn folders(&self) -> QueueFolders {
        QueueFolders {
            inbox: self.folders.inbox.clone(),
            done: self.folders.done.clone(),
            error: self.folders.error.clone(),
        }
    }

    /// Time between two polls.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    /// IMAP inactivity timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Retention of seen report IDs.
    #[must_use]
    pub const fn deduplication_max_age(&self) -> Duration {
        Duration::from_secs(self.deduplication_max_seconds)
    }

    /// File holding the persisted metrics.
    #[must_use]
    pub fn metrics_db(&self) -> PathBuf {
        self.storage_path.join("metrics.db")
    }

    /// File holding the seen report IDs.
    #[must_use]
    pub fn seen_reports_db(&self) -> PathBuf {
        self.storage_path.join("seen-reports.db")
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
    fn minimal_configuration_uses_defaults() {
        let config = Configuration::from_json(
            r#"{"imap": {"host": "imap.example.com", "username": "dmarc", "password": "secret"}}"#,
        )
        .unwrap();

        assert_eq!(config.listen_addr, "127.0.0.1");
        assert_eq!(config.port, 9797);
        assert_eq!(config.poll_interval(), Duration::from_secs(60));
        assert_eq!(config.timeout(), Duration::from_secs(60));
        assert_eq!(config.deduplication_max_age(), Duration::from_secs(604800));
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
        assert_eq!(
            config.metrics_db(),
            PathBuf::from("/var/lib/dmarc-metrics-exporter/metrics.db")
        );
        assert_eq!(config.folders(), QueueFolders::default());

        let connection = config.connection();
        assert_eq!(connection.host, "imap.example.com");
        assert_eq!(connection.port, 993);
        assert!(connection.use_ssl);
        assert!(connection.verify_certificate);
        assert_eq!(connection.tls_maximum_version, None);
    }

    #[test]
    fn full_configuration() {
        let config = Configuration::from_json(
            r#"{
                "listen_addr": "0.0.0.0",
                "port": 9119,
                "imap": {
                    "host": "localhost",
                    "port": 3993,
                    "username": "dmarc@example.com",
                    "password": "secret",
                    "use_ssl": true,
                    "verify_certificate": false,
                    "tls_maximum_version": "TLSv1_2"
                },
                "folders": {"inbox": "dmarc", "done": "dmarc/done"},
                "poll_interval_seconds": 5,
                "storage_path": "/tmp/dmarc",
                "deduplication_max_seconds": 3600,
                "logging": {"level": "debug", "json": true}
            }"#,
        )
        .unwrap();

        assert_eq!(config.listen_addr, "0.0.0.0");
        assert_eq!(config.port, 9119);
        assert_eq!(config.folders.inbox, "dmarc");
        assert_eq!(config.folders.done, "dmarc/done");
        assert_eq!(config.folders.error, "Invalid");
        assert_eq!(config.seen_reports_db(), PathBuf::from("/tmp/dmarc/seen-reports.db"));

        let connection = config.connection();
        assert_eq!(connection.port, 3993);
        assert!(!connection.verify_certificate);
        assert_eq!(connection.tls_maximum_version, Some(TlsVersion::Tls12));
    }

    #[test]
    fn missing_imap_section_is_rejected() {
        assert!(Configuration::from_json(r#"{"port": 9797}"#).is_err());
    }

    #[test]
    fn unknown_tls_version_is_rejected() {
        let err = Configuration::from_json(
            r#"{"imap": {"host": "h", "username": "u", "password": "p", "tls_maximum_version": "SSLv3"}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("SSLv3"));
    }

    #[test]
    fn debug_hides_password() {
        let config = Configuration::from_json(
            r#"{"imap": {"host": "h", "username": "u", "password": "hunter2"}}"#,
        )
        .unwrap();
        assert!(!format!("{config:?}").contains("hunter2"));
    }
}

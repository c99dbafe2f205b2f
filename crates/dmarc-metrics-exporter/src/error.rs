//! Error types for the exporter.

use thiserror::Error;

/// Errors that can occur while ingesting reports or serving metrics.
#[derive(Debug, Error)]
pub enum Error {
    /// IMAP operation failed.
    #[error("IMAP error: {0}")]
    Imap(#[from] dmarc_imap::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// A report document is not a valid DMARC aggregate report.
    #[error("Invalid report XML: {0}")]
    Xml(#[from] quick_xml::DeError),

    /// A zip attachment could not be read.
    #[error("Invalid zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Metrics could not be registered or encoded.
    #[error("Prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),

    /// No report was found in any part of an email.
    #[error("Failed to extract report from email by {from} with subject '{subject}'")]
    Extraction {
        /// Sender address, `<from missing>` if absent.
        from: String,
        /// Subject line, `<no subject>` if absent.
        subject: String,
        /// Raw sender address, if the email had one.
        from_email: Option<String>,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

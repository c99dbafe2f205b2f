//! # dmarc-metrics-exporter
//!
//! Reads DMARC aggregate reports from an IMAP mailbox and exports the
//! results as Prometheus metrics.
//!
//! Each poll cycle hands the emails in the inbox folder to a
//! [`ReportHandler`], which extracts the attached reports, skips reports
//! already counted and adds the records to per-label counters. Processed
//! emails are moved to the done folder, emails without a report to the
//! error folder. The counters are served on `GET /metrics` and saved to
//! disk periodically and on shutdown.
//!
//! ## Modules
//!
//! - [`app`]: Process wiring and the report handler
//! - [`config`]: JSON configuration file
//! - [`event`]: Conversion of report records into counted events
//! - [`expiring_set`]: Time-limited memory of seen reports
//! - [`exporter`]: Prometheus rendering and HTTP endpoint
//! - [`logging`]: Tracing subscriber setup
//! - [`metrics`]: Counter aggregation
//! - [`persistence`]: Saving counters across restarts
//! - [`report`]: Report model and extraction from emails

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod app;
pub mod config;
mod error;
pub mod event;
pub mod expiring_set;
pub mod exporter;
pub mod logging;
pub mod metrics;
pub mod persistence;
pub mod report;

pub use app::{App, ReportHandler};
pub use config::Configuration;
pub use error::{Error, Result};
pub use event::{DmarcEvent, DmarcResult, Meta};
pub use expiring_set::ExpiringSet;
pub use exporter::{MetricsServer, PrometheusExporter};
pub use metrics::{DmarcMetrics, DmarcMetricsCollection, InvalidMeta};
pub use persistence::MetricsPersister;

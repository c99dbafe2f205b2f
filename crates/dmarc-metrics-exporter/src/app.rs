//! The exporter process: poll reports, count them, serve the counters.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dmarc_imap::{ImapQueue, MessageHandler};
use tracing::{debug, info, warn};

use crate::config::Configuration;
use crate::event::convert_to_events;
use crate::expiring_set::ExpiringSet;
use crate::exporter::{PrometheusExporter, SharedMetrics};
use crate::metrics::{DmarcMetricsCollection, InvalidMeta};
use crate::persistence::MetricsPersister;
use crate::report::extract_reports;
use crate::{Error, Result};

/// Time between two saves of the counters.
pub const DEFAULT_AUTOSAVE_INTERVAL: Duration = Duration::from_secs(60);

/// `(org_name, report_id)` of a counted report.
type ReportKey = (String, String);

/// Counts the reports found in queue messages.
#[derive(Debug)]
pub struct ReportHandler {
    metrics: SharedMetrics,
    seen_reports: Mutex<ExpiringSet<ReportKey>>,
}

impl ReportHandler {
    /// Handler adding to `metrics` and skipping reports in `seen_reports`.
    #[must_use]
    pub const fn new(metrics: SharedMetrics, seen_reports: ExpiringSet<ReportKey>) -> Self {
        Self {
            metrics,
            seen_reports: Mutex::new(seen_reports),
        }
    }

    /// Counts every report in an email that was not counted before.
    ///
    /// Emails without a report are counted as invalid and accepted. Reports
    /// that cannot be decoded are returned as error so that the queue moves
    /// the email aside.
    pub fn process(&self, message: &[u8]) -> Result<()> {
        let reports = match extract_reports(message) {
            Ok(reports) => reports,
            Err(Error::Extraction {
                from,
                subject,
                from_email,
            }) => {
                warn!(%from, %subject, "no report in email");
                self.metrics().inc_invalid(InvalidMeta { from_email });
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        for report in reports {
            if let Some(key) = report.report_key() {
                let mut seen = self
                    .seen_reports
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                if !seen.insert(key.clone()) {
                    debug!(org_name = %key.0, report_id = %key.1, "skipping duplicate report");
                    continue;
                }
            }

            let events = convert_to_events(&report);
            debug!(events = events.len(), "counting report");
            let mut metrics = self.metrics();
            for event in &events {
                metrics.update(event);
            }
        }
        Ok(())
    }

    /// Writes the seen report IDs to `path`.
    pub fn persist_seen_reports(&self, path: &Path) -> Result<()> {
        self.seen_reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .persist(path)
    }

    fn metrics(&self) -> std::sync::MutexGuard<'_, DmarcMetricsCollection> {
        self.metrics.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MessageHandler for ReportHandler {
    type Error = Error;

    async fn handle(&self, message: &[u8]) -> Result<()> {
        self.process(message)
    }
}

/// The exporter process.
#[derive(Debug)]
pub struct App {
    config: Configuration,
    autosave_interval: Duration,
}

impl App {
    /// App for a loaded configuration.
    #[must_use]
    pub const fn new(config: Configuration) -> Self {
        Self {
            config,
            autosave_interval: DEFAULT_AUTOSAVE_INTERVAL,
        }
    }

    /// Sets the time between two saves of the counters.
    #[must_use]
    pub const fn with_autosave_interval(mut self, interval: Duration) -> Self {
        self.autosave_interval = interval;
        self
    }

    /// Runs until Ctrl-C.
    pub async fn run(self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "cannot listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
            info!("shutting down");
        })
        .await
    }

    /// Runs until `shutdown` completes, then stops polling and saves state.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let config = &self.config;
        std::fs::create_dir_all(&config.storage_path)?;

        let persister = MetricsPersister::new(config.metrics_db());
        let metrics = SharedMetrics::new(Mutex::new(persister.load()?));
        let seen_reports_db = config.seen_reports_db();
        let seen_reports = if seen_reports_db.exists() {
            ExpiringSet::load(&seen_reports_db, config.deduplication_max_age())?
        } else {
            ExpiringSet::new(config.deduplication_max_age())
        };
        let handler = Arc::new(ReportHandler::new(metrics.clone(), seen_reports));
        let state = State {
            persister,
            metrics: metrics.clone(),
            handler: handler.clone(),
            seen_reports_db,
        };

        let server = PrometheusExporter::new(metrics)
            .start_server((config.listen_addr.as_str(), config.port))
            .await?;

        let mut queue = ImapQueue::new(config.connection(), config.folders(), config.poll_interval())
            .with_timeout(config.timeout());
        queue.consume(handler);

        tokio::pin!(shutdown);
        let mut autosave = tokio::time::interval(self.autosave_interval);
        autosave.tick().await;
        loop {
            tokio::select! {
                _ = autosave.tick() => {
                    if let Err(e) = state.save() {
                        warn!(error = %e, "autosave failed");
                    }
                }
                () = &mut shutdown => break,
            }
        }

        queue.stop_consumer().await;
        server.shutdown().await;
        state.save()
    }
}

struct State {
    persister: MetricsPersister,
    metrics: SharedMetrics,
    handler: Arc<ReportHandler>,
    seen_reports_db: PathBuf,
}

impl State {
    fn save(&self) -> Result<()> {
        {
            let metrics = self.metrics.lock().unwrap_or_else(PoisonError::into_inner);
            self.persister.save(&metrics)?;
        }
        self.handler.persist_seen_reports(&self.seen_reports_db)?;
        debug!("state saved");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::report::model::tests::sample_xml;

    fn handler() -> ReportHandler {
        ReportHandler::new(
            SharedMetrics::default(),
            ExpiringSet::new(Duration::from_secs(3600)),
        )
    }

    fn email(body: &str) -> Vec<u8> {
        format!(
            "From: noreply-dmarc-support@google.com\r\n\
             Subject: Report domain: mydomain.de\r\n\
             Content-Type: text/xml\r\n\
             \r\n\
             {body}"
        )
        .into_bytes()
    }

    #[test]
    fn counts_each_report_once() {
        let handler = handler();

        handler.process(&email(&sample_xml("1"))).unwrap();
        handler.process(&email(&sample_xml("1"))).unwrap();
        handler.process(&email(&sample_xml("2"))).unwrap();

        let metrics = handler.metrics();
        let counts: Vec<u64> = metrics.sorted().iter().map(|(_, m)| m.total_count).collect();
        assert_eq!(counts, vec![2]);
        assert!(metrics.invalid_reports.is_empty());
    }

    #[test]
    fn email_without_report_is_counted_as_invalid() {
        let handler = handler();
        let raw = b"From: someone@example.com\r\nSubject: Hi\r\n\r\nhello\r\n";

        handler.process(raw).unwrap();

        let metrics = handler.metrics();
        assert_eq!(
            metrics.sorted_invalid(),
            vec![(
                &InvalidMeta {
                    from_email: Some("someone@example.com".to_string())
                },
                1
            )]
        );
        assert!(metrics.metrics.is_empty());
    }

    #[test]
    fn broken_report_is_an_error_but_not_invalid() {
        let handler = handler();
        let raw = email("<feedback><record><row><count>x</count></row></record></feedback>");

        assert!(handler.process(&raw).is_err());
        assert!(handler.metrics().invalid_reports.is_empty());
    }

    #[tokio::test]
    async fn saves_state_on_shutdown() {
        let storage = std::env::temp_dir().join(format!("dmarc-app-{}", std::process::id()));
        let imap_port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let config = Configuration::from_json(&format!(
            r#"{{
                "port": 0,
                "imap": {{"host": "127.0.0.1", "port": {imap_port}, "username": "u", "password": "p", "use_ssl": false}},
                "storage_path": {storage:?},
                "poll_interval_seconds": 3600
            }}"#
        ))
        .unwrap();

        App::new(config.clone())
            .run_until(tokio::time::sleep(Duration::from_millis(200)))
            .await
            .unwrap();

        assert!(config.metrics_db().exists());
        assert!(config.seen_reports_db().exists());
        assert_eq!(
            MetricsPersister::new(config.metrics_db()).load().unwrap(),
            DmarcMetricsCollection::default()
        );

        std::fs::remove_dir_all(&storage).unwrap();
    }
}

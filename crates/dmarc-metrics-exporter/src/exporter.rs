//! Prometheus text exposition over HTTP.
//!
//! Counters are rendered from the shared collection on every scrape, so the
//! exporter never holds state of its own.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{self, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{IntCounterVec, IntGaugeVec, Opts, Registry, TEXT_FORMAT, TextEncoder};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::Result;
use crate::metrics::DmarcMetricsCollection;
use crate::report::Disposition;

const LABELS: [&str; 4] = ["reporter", "from_domain", "dkim_domain", "spf_domain"];
const INVALID_LABELS: [&str; 1] = ["from_email"];

/// Counters shared between the report handler and the exporter.
pub type SharedMetrics = Arc<Mutex<DmarcMetricsCollection>>;

/// Renders the shared counters in the Prometheus text format.
#[derive(Debug, Clone)]
pub struct PrometheusExporter {
    metrics: SharedMetrics,
}

impl PrometheusExporter {
    /// Exporter for the given counters.
    #[must_use]
    pub const fn new(metrics: SharedMetrics) -> Self {
        Self { metrics }
    }

    /// The counters this exporter renders.
    #[must_use]
    pub const fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    /// Renders all metric families.
    pub fn render(&self) -> Result<String> {
        let registry = Registry::new();

        let build_info = IntGaugeVec::new(
            Opts::new(
                "dmarc_metrics_exporter_build_info",
                "A metric with a constant '1' value labeled by version of the dmarc-metrics-exporter.",
            ),
            &["version"],
        )?;
        registry.register(Box::new(build_info.clone()))?;
        build_info
            .with_label_values(&[env!("CARGO_PKG_VERSION")])
            .set(1);

        let counter = |name: &str, help: &str, labels: &[&str]| -> Result<IntCounterVec> {
            let vec = IntCounterVec::new(Opts::new(name, help), labels)?;
            registry.register(Box::new(vec.clone()))?;
            Ok(vec)
        };
        let total = counter("dmarc_total", "Total number of reported messages.", &LABELS)?;
        let compliant = counter(
            "dmarc_compliant_total",
            "Total number of DMARC compliant messages.",
            &LABELS,
        )?;
        let quarantine = counter(
            "dmarc_quarantine_total",
            "Total number of quarantined messages.",
            &LABELS,
        )?;
        let reject = counter(
            "dmarc_reject_total",
            "Total number of rejected messages.",
            &LABELS,
        )?;
        let spf_aligned = counter(
            "dmarc_spf_aligned_total",
            "Total number of SPF aligned messages.",
            &LABELS,
        )?;
        let spf_pass = counter(
            "dmarc_spf_pass_total",
            "Total number of messages with raw SPF pass.",
            &LABELS,
        )?;
        let dkim_aligned = counter(
            "dmarc_dkim_aligned_total",
            "Total number of DKIM aligned messages.",
            &LABELS,
        )?;
        let dkim_pass = counter(
            "dmarc_dkim_pass_total",
            "Total number of messages with raw DKIM pass.",
            &LABELS,
        )?;
        let invalid = counter(
            "dmarc_invalid_reports_total",
            "Total number of report emails from which no report could be parsed.",
            &INVALID_LABELS,
        )?;

        {
            let metrics = self.metrics.lock().unwrap_or_else(PoisonError::into_inner);
            for (meta, counts) in metrics.sorted() {
                let labels = [
                    meta.reporter.as_str(),
                    meta.from_domain.as_str(),
                    meta.dkim_domain.as_str(),
                    meta.spf_domain.as_str(),
                ];
                total.with_label_values(&labels).inc_by(counts.total_count);
                compliant
                    .with_label_values(&labels)
                    .inc_by(counts.dmarc_compliant_count);
                quarantine
                    .with_label_values(&labels)
                    .inc_by(counts.disposition(Disposition::Quarantine));
                reject
                    .with_label_values(&labels)
                    .inc_by(counts.disposition(Disposition::Reject));
                spf_aligned
                    .with_label_values(&labels)
                    .inc_by(counts.spf_aligned_count);
                spf_pass.with_label_values(&labels).inc_by(counts.spf_pass_count);
                dkim_aligned
                    .with_label_values(&labels)
                    .inc_by(counts.dkim_aligned_count);
                dkim_pass
                    .with_label_values(&labels)
                    .inc_by(counts.dkim_pass_count);
            }
            for (meta, count) in metrics.sorted_invalid() {
                invalid
                    .with_label_values(&[meta.from_email.as_deref().unwrap_or_default()])
                    .inc_by(count);
            }
        }

        Ok(TextEncoder::new().encode_to_string(&registry.gather())?)
    }

    fn respond(&self, request: &Request<Incoming>) -> Response<Full<Bytes>> {
        if request.method() != Method::GET || request.uri().path() != "/metrics" {
            return plain(StatusCode::NOT_FOUND, "Not Found\n".into());
        }
        match self.render() {
            Ok(body) => {
                let mut response = plain(StatusCode::OK, body);
                response.headers_mut().insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static(TEXT_FORMAT),
                );
                response
            }
            Err(e) => {
                warn!(error = %e, "cannot render metrics");
                plain(StatusCode::INTERNAL_SERVER_ERROR, format!("{e}\n"))
            }
        }
    }

    /// Binds the metrics endpoint and serves it in a background task.
    pub async fn start_server(&self, addr: impl ToSocketAddrs) -> Result<MetricsServer> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let exporter = self.clone();

        let task = tokio::spawn(async move {
            info!(%local_addr, "serving metrics");
            loop {
                tokio::select! {
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            tokio::spawn(serve_connection(exporter.clone(), stream, peer));
                        }
                        Err(e) => warn!(error = %e, "cannot accept metrics connection"),
                    },
                    _ = stop_rx.changed() => break,
                }
            }
            info!(%local_addr, "metrics server stopped");
        });

        Ok(MetricsServer {
            local_addr,
            stop: stop_tx,
            task,
        })
    }
}

async fn serve_connection(
    exporter: PrometheusExporter,
    stream: tokio::net::TcpStream,
    peer: SocketAddr,
) {
    let service = service_fn(|request: Request<Incoming>| {
        let response = exporter.respond(&request);
        async move { Ok::<_, Infallible>(response) }
    });
    if let Err(e) = http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .await
    {
        debug!(%peer, error = %e, "metrics connection failed");
    }
}

fn plain(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// Handle of a running metrics endpoint.
#[derive(Debug)]
pub struct MetricsServer {
    local_addr: SocketAddr,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MetricsServer {
    /// Address the endpoint is bound to.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting connections and waits for the accept loop to end.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "metrics server panicked");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    use super::*;
    use crate::event::Meta;
    use crate::metrics::{DmarcMetrics, InvalidMeta};

    fn meta(reporter: &str) -> Meta {
        Meta {
            reporter: reporter.to_string(),
            from_domain: "mydomain.de".to_string(),
            dkim_domain: "sub.mydomain.de".to_string(),
            spf_domain: "mydomain.de".to_string(),
        }
    }

    fn exporter() -> PrometheusExporter {
        let collection = DmarcMetricsCollection {
            metrics: HashMap::from([
                (
                    meta("google.com"),
                    DmarcMetrics {
                        total_count: 42,
                        disposition_counts: HashMap::from([
                            (Disposition::Quarantine, 3),
                            (Disposition::None, 39),
                        ]),
                        dmarc_compliant_count: 39,
                        dkim_aligned_count: 39,
                        dkim_pass_count: 39,
                        spf_pass_count: 42,
                        spf_aligned_count: 42,
                    },
                ),
                (
                    meta("yahoo.com"),
                    DmarcMetrics {
                        total_count: 1,
                        disposition_counts: HashMap::from([(Disposition::None, 1)]),
                        dmarc_compliant_count: 1,
                        dkim_aligned_count: 1,
                        dkim_pass_count: 1,
                        spf_pass_count: 1,
                        spf_aligned_count: 1,
                    },
                ),
            ]),
            invalid_reports: HashMap::from([(
                InvalidMeta {
                    from_email: Some("someone@example.org".to_string()),
                },
                42,
            )]),
        };
        PrometheusExporter::new(Arc::new(Mutex::new(collection)))
    }

    /// Value of the sample of `name` whose labels contain every `labels` pair.
    fn sample(text: &str, name: &str, labels: &[(&str, &str)]) -> Option<u64> {
        text.lines()
            .filter(|line| !line.starts_with('#'))
            .filter(|line| {
                line.split(['{', ' '])
                    .next()
                    .is_some_and(|metric| metric == name)
            })
            .find(|line| {
                labels
                    .iter()
                    .all(|(key, value)| line.contains(&format!("{key}=\"{value}\"")))
            })
            .and_then(|line| line.rsplit(' ').next())
            .and_then(|value| value.parse().ok())
    }

    #[test]
    fn renders_every_counter_per_label_set() {
        let text = exporter().render().unwrap();
        let google = [
            ("reporter", "google.com"),
            ("from_domain", "mydomain.de"),
            ("dkim_domain", "sub.mydomain.de"),
            ("spf_domain", "mydomain.de"),
        ];

        assert_eq!(sample(&text, "dmarc_total", &google), Some(42));
        assert_eq!(sample(&text, "dmarc_compliant_total", &google), Some(39));
        assert_eq!(sample(&text, "dmarc_quarantine_total", &google), Some(3));
        assert_eq!(sample(&text, "dmarc_reject_total", &google), Some(0));
        assert_eq!(sample(&text, "dmarc_dkim_aligned_total", &google), Some(39));
        assert_eq!(sample(&text, "dmarc_dkim_pass_total", &google), Some(39));
        assert_eq!(sample(&text, "dmarc_spf_aligned_total", &google), Some(42));
        assert_eq!(sample(&text, "dmarc_spf_pass_total", &google), Some(42));

        let yahoo = [("reporter", "yahoo.com")];
        assert_eq!(sample(&text, "dmarc_total", &yahoo), Some(1));
        assert_eq!(sample(&text, "dmarc_quarantine_total", &yahoo), Some(0));

        assert_eq!(
            sample(
                &text,
                "dmarc_invalid_reports_total",
                &[("from_email", "someone@example.org")]
            ),
            Some(42)
        );
        assert!(text.contains("# TYPE dmarc_total counter"));
    }

    #[test]
    fn build_info_is_always_present() {
        let exporter = PrometheusExporter::new(SharedMetrics::default());
        let text = exporter.render().unwrap();
        assert_eq!(
            sample(
                &text,
                "dmarc_metrics_exporter_build_info",
                &[("version", env!("CARGO_PKG_VERSION"))]
            ),
            Some(1)
        );
        assert!(sample(&text, "dmarc_total", &[]).is_none());
    }

    #[test]
    fn renders_current_counters_on_every_call() {
        let exporter = exporter();
        exporter
            .metrics()
            .lock()
            .unwrap()
            .inc_invalid(InvalidMeta::default());

        let text = exporter.render().unwrap();
        assert_eq!(
            sample(&text, "dmarc_invalid_reports_total", &[("from_email", "")]),
            Some(1)
        );
    }

    async fn get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(
                format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
                    .as_bytes(),
            )
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn serves_metrics_over_http() {
        let server = exporter().start_server("127.0.0.1:0").await.unwrap();

        let response = get(server.local_addr(), "/metrics").await;
        assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
        assert!(response.contains("text/plain; version=0.0.4"));
        assert!(response.contains("dmarc_metrics_exporter_build_info"));

        let response = get(server.local_addr(), "/").await;
        assert!(response.starts_with("HTTP/1.1 404 Not Found"), "{response}");

        let addr = server.local_addr();
        server.shutdown().await;
        assert!(TcpStream::connect(addr).await.is_err());
    }
}

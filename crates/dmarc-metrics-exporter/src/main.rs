//! `dmarc-metrics-exporter` binary.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use dmarc_metrics_exporter::config::DEFAULT_CONFIG_PATH;
use dmarc_metrics_exporter::{App, Configuration, logging};
use tracing::info;

/// Monitor an IMAP account for DMARC aggregate reports and provide a
/// Prometheus endpoint for metrics derived from incoming reports.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    configuration: PathBuf,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Configuration::load(&args.configuration)
        .with_context(|| format!("loading {}", args.configuration.display()))?;
    logging::init(&config.logging, args.debug)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        imap = %config.imap.host,
        listen = %format!("{}:{}", config.listen_addr, config.port),
        "starting dmarc-metrics-exporter"
    );

    App::new(config).run().await?;
    Ok(())
}

//! Saving and restoring counters across restarts.
//!
//! Maps are written as lists of `[key, value]` pairs because their keys are
//! structs. Files that only hold the list of metric pairs, without invalid
//! report counters, are still read.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::Result;
use crate::event::Meta;
use crate::metrics::{DmarcMetrics, DmarcMetricsCollection, InvalidMeta};

#[derive(Serialize)]
struct StoredRef<'a> {
    metrics: Vec<(&'a Meta, &'a DmarcMetrics)>,
    invalid_reports: Vec<(&'a InvalidMeta, u64)>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Stored {
    Current {
        metrics: Vec<(Meta, DmarcMetrics)>,
        #[serde(default)]
        invalid_reports: Vec<(InvalidMeta, u64)>,
    },
    MetricsOnly(Vec<(Meta, DmarcMetrics)>),
}

impl From<Stored> for DmarcMetricsCollection {
    fn from(stored: Stored) -> Self {
        match stored {
            Stored::Current {
                metrics,
                invalid_reports,
            } => Self {
                metrics: metrics.into_iter().collect(),
                invalid_reports: invalid_reports.into_iter().collect(),
            },
            Stored::MetricsOnly(metrics) => Self {
                metrics: metrics.into_iter().collect(),
                invalid_reports: std::collections::HashMap::new(),
            },
        }
    }
}

/// Reads and writes the metrics file.
#[derive(Debug, Clone)]
pub struct MetricsPersister {
    path: PathBuf,
}

impl MetricsPersister {
    /// Persister for the given file.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the metrics file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the saved counters, or empty ones if nothing was saved yet.
    pub fn load(&self) -> Result<DmarcMetricsCollection> {
        let content = match std::fs::read(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no saved metrics");
                return Ok(DmarcMetricsCollection::default());
            }
            Err(e) => return Err(e.into()),
        };
        let stored: Stored = serde_json::from_slice(&content)?;
        Ok(stored.into())
    }

    /// Saves the counters.
    pub fn save(&self, metrics: &DmarcMetricsCollection) -> Result<()> {
        let stored = StoredRef {
            metrics: metrics.sorted(),
            invalid_reports: metrics.sorted_invalid(),
        };
        std::fs::write(&self.path, serde_json::to_vec(&stored)?)?;
        debug!(path = %self.path.display(), "saved metrics");
        Ok(())
    }
}

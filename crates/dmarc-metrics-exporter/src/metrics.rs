//! Accumulated counters per label set.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::event::{DmarcEvent, DmarcResult, Meta};
use crate::report::Disposition;

/// Counters for one label set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DmarcMetrics {
    /// All reported messages.
    pub total_count: u64,
    /// Messages per applied disposition.
    pub disposition_counts: HashMap<Disposition, u64>,
    /// Messages passing DMARC.
    pub dmarc_compliant_count: u64,
    /// Messages with raw DKIM pass.
    pub dkim_pass_count: u64,
    /// Messages with raw SPF pass.
    pub spf_pass_count: u64,
    /// Messages with aligned DKIM pass.
    pub dkim_aligned_count: u64,
    /// Messages with aligned SPF pass.
    pub spf_aligned_count: u64,
}

impl DmarcMetrics {
    /// Adds `count` messages with the given outcome.
    pub fn update(&mut self, count: u64, result: &DmarcResult) {
        self.total_count += count;
        *self
            .disposition_counts
            .entry(result.disposition)
            .or_default() += count;
        if result.dmarc_compliant() {
            self.dmarc_compliant_count += count;
        }
        if result.dkim_pass {
            self.dkim_pass_count += count;
        }
        if result.spf_pass {
            self.spf_pass_count += count;
        }
        if result.dkim_aligned {
            self.dkim_aligned_count += count;
        }
        if result.spf_aligned {
            self.spf_aligned_count += count;
        }
    }

    /// Messages with the given disposition.
    #[must_use]
    pub fn disposition(&self, disposition: Disposition) -> u64 {
        self.disposition_counts
            .get(&disposition)
            .copied()
            .unwrap_or_default()
    }
}

/// Labels of an email that did not contain a report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InvalidMeta {
    /// Sender address, if the email had one.
    pub from_email: Option<String>,
}

/// All counters the exporter serves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DmarcMetricsCollection {
    /// Counters per label set.
    pub metrics: HashMap<Meta, DmarcMetrics>,
    /// Emails without a usable report, per sender.
    pub invalid_reports: HashMap<InvalidMeta, u64>,
}

impl DmarcMetricsCollection {
    /// Counts an event.
    pub fn update(&mut self, event: &DmarcEvent) {
        self.metrics
            .entry(event.meta.clone())
            .or_default()
            .update(event.count, &event.result);
    }

    /// Counts an email without a usable report.
    pub fn inc_invalid(&mut self, meta: InvalidMeta) {
        *self.invalid_reports.entry(meta).or_default() += 1;
    }

    /// Counters per label set, sorted by labels.
    #[must_use]
    pub fn sorted(&self) -> Vec<(&Meta, &DmarcMetrics)> {
        let mut entries: Vec<_> = self.metrics.iter().collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
        entries
    }

    /// Invalid report counters, sorted by sender.
    #[must_use]
    pub fn sorted_invalid(&self) -> Vec<(&InvalidMeta, u64)> {
        let mut entries: Vec<_> = self.invalid_reports.iter().map(|(k, v)| (k, *v)).collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
        entries
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn meta(reporter: &str) -> Meta {
        Meta {
            reporter: reporter.to_string(),
            from_domain: "mydomain.de".to_string(),
            dkim_domain: "sub.mydomain.de".to_string(),
            spf_domain: "mydomain.de".to_string(),
        }
    }

    #[test]
    fn update_counts_every_property() {
        let mut metrics = DmarcMetrics::default();
        metrics.update(
            2,
            &DmarcResult {
                disposition: Disposition::Quarantine,
                dkim_pass: true,
                dkim_aligned: false,
                spf_pass: true,
                spf_aligned: true,
            },
        );

        assert_eq!(
            metrics,
            DmarcMetrics {
                total_count: 2,
                disposition_counts: HashMap::from([(Disposition::Quarantine, 2)]),
                dmarc_compliant_count: 2,
                dkim_pass_count: 2,
                spf_pass_count: 2,
                dkim_aligned_count: 0,
                spf_aligned_count: 2,
            }
        );
        assert_eq!(metrics.disposition(Disposition::Reject), 0);
    }

    #[test]
    fn collection_groups_by_labels() {
        let mut collection = DmarcMetricsCollection::default();
        let event = |reporter: &str, count| DmarcEvent {
            count,
            meta: meta(reporter),
            result: DmarcResult::default(),
        };

        collection.update(&event("google.com", 1));
        collection.update(&event("yahoo.com", 3));
        collection.update(&event("google.com", 4));

        let sorted = collection.sorted();
        assert_eq!(sorted.len(), 2);
        assert_eq!(sorted[0].0.reporter, "google.com");
        assert_eq!(sorted[0].1.total_count, 5);
        assert_eq!(sorted[0].1.disposition(Disposition::None), 5);
        assert_eq!(sorted[1].1.total_count, 3);
    }

    #[test]
    fn invalid_reports_per_sender() {
        let mut collection = DmarcMetricsCollection::default();
        let someone = InvalidMeta {
            from_email: Some("someone@example.com".to_string()),
        };
        collection.inc_invalid(someone.clone());
        collection.inc_invalid(InvalidMeta::default());
        collection.inc_invalid(someone.clone());

        assert_eq!(
            collection.sorted_invalid(),
            vec![(&InvalidMeta::default(), 1), (&someone, 2)]
        );
    }
}

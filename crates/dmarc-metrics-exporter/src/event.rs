//! Per-record DMARC outcomes.
//!
//! A report holds one record per source and result combination. Each record
//! becomes a [`DmarcEvent`]: the labels it is counted under and what
//! happened to the messages.

use serde::{Deserialize, Serialize};

use crate::report::model::{DkimResult, DmarcResult as Evaluated, SpfResult};
use crate::report::{Disposition, Feedback};

/// Labels a group of messages is counted under.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Meta {
    /// Organization that sent the report.
    pub reporter: String,
    /// RFC 5322 From domain.
    pub from_domain: String,
    /// Domain of the first DKIM signature.
    pub dkim_domain: String,
    /// Domain checked by SPF.
    pub spf_domain: String,
}

/// Authentication and policy outcome for a group of messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DmarcResult {
    /// Applied disposition.
    pub disposition: Disposition,
    /// Raw DKIM verification passed.
    pub dkim_pass: bool,
    /// Raw SPF check passed.
    pub spf_pass: bool,
    /// DKIM passed and aligned with the From domain.
    pub dkim_aligned: bool,
    /// SPF passed and aligned with the From domain.
    pub spf_aligned: bool,
}

impl DmarcResult {
    /// DMARC passes if either mechanism both passed and aligned.
    #[must_use]
    pub const fn dmarc_compliant(&self) -> bool {
        (self.dkim_aligned && self.dkim_pass) || (self.spf_aligned && self.spf_pass)
    }
}

/// `count` messages with the same labels and outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmarcEvent {
    /// Number of messages.
    pub count: u64,
    /// Labels.
    pub meta: Meta,
    /// Outcome.
    pub result: DmarcResult,
}

/// Converts every record with a `<row>` into an event.
///
/// Only the first DKIM and the first SPF result of a record are considered.
/// A missing count means a single message.
#[must_use]
pub fn convert_to_events(feedback: &Feedback) -> Vec<DmarcEvent> {
    let reporter = feedback
        .report_metadata
        .as_ref()
        .and_then(|m| m.org_name.clone())
        .unwrap_or_default();

    feedback
        .record
        .iter()
        .filter_map(|record| {
            let row = record.row.as_ref()?;

            let from_domain = record
                .identifiers
                .as_ref()
                .and_then(|i| i.header_from.clone())
                .unwrap_or_default();

            let dkim = record.auth_results.as_ref().and_then(|a| a.dkim.first());
            let spf = record.auth_results.as_ref().and_then(|a| a.spf.first());

            let evaluated = row.policy_evaluated.as_ref();

            Some(DmarcEvent {
                count: row.count.unwrap_or(1),
                meta: Meta {
                    reporter: reporter.clone(),
                    from_domain,
                    dkim_domain: dkim.and_then(|d| d.domain.clone()).unwrap_or_default(),
                    spf_domain: spf.and_then(|s| s.domain.clone()).unwrap_or_default(),
                },
                result: DmarcResult {
                    disposition: evaluated.and_then(|e| e.disposition).unwrap_or_default(),
                    dkim_pass: dkim.is_some_and(|d| d.result == Some(DkimResult::Pass)),
                    spf_pass: spf.is_some_and(|s| s.result == Some(SpfResult::Pass)),
                    dkim_aligned: evaluated.is_some_and(|e| e.dkim == Some(Evaluated::Pass)),
                    spf_aligned: evaluated.is_some_and(|e| e.spf == Some(Evaluated::Pass)),
                },
            })
        })
        .collect()
}

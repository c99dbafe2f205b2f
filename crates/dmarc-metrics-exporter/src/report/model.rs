//! DMARC aggregate report document (RFC 7489, appendix C).
//!
//! Every element the exporter does not rely on is optional so that reports
//! from sloppy reporters still decode. Unknown elements are ignored.

use serde::{Deserialize, Serialize};

use crate::Result;

/// Root `<feedback>` element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Feedback {
    /// Report format version.
    pub version: Option<String>,
    /// Who sent the report and what it covers.
    pub report_metadata: Option<ReportMetadata>,
    /// Policy published by the domain owner.
    pub policy_published: Option<PolicyPublished>,
    /// One record per source IP and authentication outcome.
    #[serde(default)]
    pub record: Vec<Record>,
}

impl Feedback {
    /// Decodes a report document.
    pub fn from_xml(xml: &str) -> Result<Self> {
        Ok(quick_xml::de::from_str(xml.trim_start())?)
    }

    /// Identifies a report for deduplication: `(org_name, report_id)`.
    #[must_use]
    pub fn report_key(&self) -> Option<(String, String)> {
        let metadata = self.report_metadata.as_ref()?;
        match (&metadata.org_name, &metadata.report_id) {
            (Some(org_name), Some(report_id)) if !org_name.is_empty() && !report_id.is_empty() => {
                Some((org_name.clone(), report_id.clone()))
            }
            _ => None,
        }
    }
}

/// `<report_metadata>`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ReportMetadata {
    /// Reporting organization.
    pub org_name: Option<String>,
    /// Contact address of the reporter.
    pub email: Option<String>,
    /// Additional contact information.
    pub extra_contact_info: Option<String>,
    /// Reporter-assigned report ID.
    pub report_id: Option<String>,
    /// Covered time range.
    pub date_range: Option<DateRange>,
    /// Errors the reporter ran into.
    #[serde(default)]
    pub error: Vec<String>,
}

/// `<date_range>` in seconds since the epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct DateRange {
    /// Start of the range.
    pub begin: u64,
    /// End of the range.
    pub end: u64,
}

/// `<policy_published>`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PolicyPublished {
    /// Domain the policy was published for.
    pub domain: Option<String>,
    /// DKIM alignment mode.
    pub adkim: Option<Alignment>,
    /// SPF alignment mode.
    pub aspf: Option<Alignment>,
    /// Policy for the domain.
    pub p: Option<Disposition>,
    /// Policy for subdomains.
    pub sp: Option<Disposition>,
    /// Percentage of messages the policy applies to.
    pub pct: Option<u8>,
    /// Failure reporting options.
    pub fo: Option<String>,
}

/// Identifier alignment mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Alignment {
    /// Relaxed.
    #[serde(rename = "r")]
    Relaxed,
    /// Strict.
    #[serde(rename = "s")]
    Strict,
}

/// Policy action applied to a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    /// Delivered as usual.
    #[default]
    None,
    /// Delivered to spam.
    Quarantine,
    /// Rejected.
    Reject,
}

impl Disposition {
    /// Lowercase name as used in reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Quarantine => "quarantine",
            Self::Reject => "reject",
        }
    }
}

/// `<record>`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Record {
    /// Source and policy evaluation.
    pub row: Option<Row>,
    /// Message identifiers.
    pub identifiers: Option<Identifiers>,
    /// Raw DKIM and SPF results.
    pub auth_results: Option<AuthResults>,
}

/// `<row>`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Row {
    /// Sending IP address.
    pub source_ip: Option<String>,
    /// Number of messages.
    pub count: Option<u64>,
    /// Outcome of the DMARC evaluation.
    pub policy_evaluated: Option<PolicyEvaluated>,
}

/// `<policy_evaluated>`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PolicyEvaluated {
    /// Applied disposition.
    pub disposition: Option<Disposition>,
    /// Aligned DKIM result.
    pub dkim: Option<DmarcResult>,
    /// Aligned SPF result.
    pub spf: Option<DmarcResult>,
    /// Reasons for deviating from the published policy.
    #[serde(default)]
    pub reason: Vec<PolicyOverrideReason>,
}

/// Aligned authentication result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DmarcResult {
    /// Passed and aligned.
    Pass,
    /// Failed or not aligned.
    Fail,
}

/// `<reason>`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PolicyOverrideReason {
    /// Override type, e.g. `forwarded`.
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Free-form comment.
    pub comment: Option<String>,
}

/// `<identifiers>`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Identifiers {
    /// Envelope recipient domain.
    pub envelope_to: Option<String>,
    /// Envelope sender domain.
    pub envelope_from: Option<String>,
    /// RFC 5322 From domain.
    pub header_from: Option<String>,
}

/// `<auth_results>`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AuthResults {
    /// DKIM results, one per signature.
    #[serde(default)]
    pub dkim: Vec<DkimAuthResult>,
    /// SPF results.
    #[serde(default)]
    pub spf: Vec<SpfAuthResult>,
}

/// `<dkim>` inside `<auth_results>`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DkimAuthResult {
    /// Signing domain.
    pub domain: Option<String>,
    /// Selector.
    pub selector: Option<String>,
    /// Verification result.
    pub result: Option<DkimResult>,
    /// Human-readable detail.
    pub human_result: Option<String>,
}

/// Raw DKIM verification result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
#[allow(missing_docs)]
pub enum DkimResult {
    None,
    Pass,
    Fail,
    Policy,
    Neutral,
    TempError,
    PermError,
}

/// `<spf>` inside `<auth_results>`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SpfAuthResult {
    /// Checked domain.
    pub domain: Option<String>,
    /// `helo` or `mfrom`.
    pub scope: Option<String>,
    /// Check result.
    pub result: Option<SpfResult>,
}

/// Raw SPF result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
#[allow(missing_docs)]
pub enum SpfResult {
    None,
    Neutral,
    Pass,
    Fail,
    SoftFail,
    TempError,
    PermError,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_xml(report_id: &str) -> String {
        format!(
            r#"
<?xml version="1.0" encoding="UTF-8" ?>
<feedback>
  <report_metadata>
    <org_name>google.com</org_name>
    <email>noreply-dmarc-support@google.com</email>
    <extra_contact_info>https://support.google.com/a/answer/2466580</extra_contact_info>
    <report_id>{report_id}</report_id>
    <date_range>
      <begin>1607299200</begin>
      <end>1607385599</end>
    </date_range>
  </report_metadata>
  <policy_published>
    <domain>mydomain.de</domain>
    <adkim>r</adkim>
    <aspf>r</aspf>
    <p>none</p>
    <sp>none</sp>
    <pct>100</pct>
    <np>none</np>
  </policy_published>
  <record>
    <row>
      <source_ip>dead:beef:1:abc::</source_ip>
      <count>1</count>
      <policy_evaluated>
        <disposition>none</disposition>
        <dkim>pass</dkim>
        <spf>fail</spf>
      </policy_evaluated>
    </row>
    <identifiers>
      <header_from>mydomain.de</header_from>
    </identifiers>
    <auth_results>
      <dkim>
        <domain>mydomain.de</domain>
        <result>pass</result>
        <selector>default</selector>
      </dkim>
      <spf>
        <domain>my-spf-domain.de</domain>
        <result>pass</result>
      </spf>
    </auth_results>
  </record>
</feedback>
"#
        )
    }

    #[test]
    fn decodes_sample_report() {
        let feedback = Feedback::from_xml(&sample_xml("12598866915817748661")).unwrap();

        let metadata = feedback.report_metadata.as_ref().unwrap();
        assert_eq!(metadata.org_name.as_deref(), Some("google.com"));
        assert_eq!(
            metadata.date_range,
            Some(DateRange {
                begin: 1607299200,
                end: 1607385599
            })
        );
        assert_eq!(
            feedback.report_key(),
            Some(("google.com".to_string(), "12598866915817748661".to_string()))
        );

        let policy = feedback.policy_published.as_ref().unwrap();
        assert_eq!(policy.adkim, Some(Alignment::Relaxed));
        assert_eq!(policy.p, Some(Disposition::None));
        assert_eq!(policy.pct, Some(100));

        assert_eq!(feedback.record.len(), 1);
        let record = &feedback.record[0];
        let row = record.row.as_ref().unwrap();
        assert_eq!(row.count, Some(1));
        let evaluated = row.policy_evaluated.as_ref().unwrap();
        assert_eq!(evaluated.disposition, Some(Disposition::None));
        assert_eq!(evaluated.dkim, Some(DmarcResult::Pass));
        assert_eq!(evaluated.spf, Some(DmarcResult::Fail));

        let auth = record.auth_results.as_ref().unwrap();
        assert_eq!(auth.dkim[0].result, Some(DkimResult::Pass));
        assert_eq!(auth.spf[0].domain.as_deref(), Some("my-spf-domain.de"));
    }

    #[test]
    fn multiple_records_and_results() {
        let xml = r"<feedback>
  <record>
    <row><count>3</count><policy_evaluated><disposition>quarantine</disposition></policy_evaluated></row>
    <auth_results>
      <dkim><domain>a.example</domain><result>fail</result></dkim>
      <dkim><domain>b.example</domain><result>pass</result></dkim>
    </auth_results>
  </record>
  <record>
    <row><count>2</count></row>
  </record>
</feedback>";
        let feedback = Feedback::from_xml(xml).unwrap();
        assert_eq!(feedback.record.len(), 2);
        assert_eq!(feedback.report_key(), None);
        let auth = feedback.record[0].auth_results.as_ref().unwrap();
        assert_eq!(auth.dkim.len(), 2);
        assert!(auth.spf.is_empty());
    }

    #[test]
    fn garbage_is_rejected() {
        let xml = "<feedback><record><row><count>many</count></row></record></feedback>";
        assert!(Feedback::from_xml(xml).is_err());
    }
}

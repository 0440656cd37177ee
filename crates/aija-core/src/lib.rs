//! Core domain model for the job-listing liveness pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "aija-core";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} value: {value:?}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Moderation status of a job posting.
///
/// The liveness pipeline only ever moves `Approved` postings to `Expired` or
/// `NeedsReview`; every other transition belongs to a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
    NeedsReview,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
            Self::NeedsReview => "needs_review",
        }
    }
}

impl FromStr for JobStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "expired" => Ok(Self::Expired),
            "needs_review" => Ok(Self::NeedsReview),
            other => Err(ParseEnumError::new("job status", other)),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a liveness check reached its decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckMethod {
    Http,
    HtmlScan,
    Error,
}

impl CheckMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::HtmlScan => "html_scan",
            Self::Error => "error",
        }
    }
}

impl FromStr for CheckMethod {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http" => Ok(Self::Http),
            "html_scan" => Ok(Self::HtmlScan),
            "error" => Ok(Self::Error),
            other => Err(ParseEnumError::new("check method", other)),
        }
    }
}

impl fmt::Display for CheckMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Discriminant of a [`Verdict`], as stored in check logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    KeepActive,
    MarkExpired,
    NeedsReview,
}

impl DecisionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::KeepActive => "keep_active",
            Self::MarkExpired => "mark_expired",
            Self::NeedsReview => "needs_review",
        }
    }
}

impl FromStr for DecisionKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keep_active" => Ok(Self::KeepActive),
            "mark_expired" => Ok(Self::MarkExpired),
            "needs_review" => Ok(Self::NeedsReview),
            other => Err(ParseEnumError::new("decision", other)),
        }
    }
}

impl fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one liveness check, with the evidence that justifies it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Verdict {
    KeepActive {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        evidence: Vec<String>,
    },
    MarkExpired {
        evidence: Vec<String>,
    },
    NeedsReview {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        evidence: Vec<String>,
        #[serde(default, rename = "errorMessage", skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
    },
}

impl Verdict {
    pub fn kind(&self) -> DecisionKind {
        match self {
            Self::KeepActive { .. } => DecisionKind::KeepActive,
            Self::MarkExpired { .. } => DecisionKind::MarkExpired,
            Self::NeedsReview { .. } => DecisionKind::NeedsReview,
        }
    }

    pub fn evidence(&self) -> &[String] {
        match self {
            Self::KeepActive { evidence }
            | Self::MarkExpired { evidence }
            | Self::NeedsReview { evidence, .. } => evidence,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::NeedsReview { error_message, .. } => error_message.as_deref(),
            _ => None,
        }
    }
}

/// Structured result of checking one application URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub method: CheckMethod,
    #[serde(flatten)]
    pub verdict: Verdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub response_time_ms: u64,
}

impl CheckResult {
    pub fn decision(&self) -> DecisionKind {
        self.verdict.kind()
    }

    pub fn evidence(&self) -> &[String] {
        self.verdict.evidence()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.verdict.error_message()
    }

    pub fn to_log_entry(&self, job_id: Uuid, checked_at: DateTime<Utc>) -> CheckLogEntry {
        CheckLogEntry {
            job_id,
            check_method: self.method,
            status_code: self.status_code,
            evidence_found: self.evidence().to_vec(),
            decision: self.decision(),
            error_message: self.error_message().map(ToString::to_string),
            response_time_ms: self.response_time_ms,
            checked_at,
        }
    }

    /// Field changes to apply to the checked posting.
    pub fn posting_update(&self, checked_at: DateTime<Utc>) -> PostingUpdate {
        let transition = match &self.verdict {
            Verdict::KeepActive { .. } => None,
            Verdict::MarkExpired { evidence } => Some(StatusTransition::Expired {
                evidence: evidence.join("; "),
            }),
            Verdict::NeedsReview {
                evidence,
                error_message,
            } => Some(StatusTransition::NeedsReview {
                reason: error_message
                    .clone()
                    .unwrap_or_else(|| evidence.join("; ")),
            }),
        };
        PostingUpdate {
            checked_at,
            method: self.method,
            transition,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    None,
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternCategory {
    Expired,
    Filled,
    Closed,
    Removed,
}

/// A phrase whose presence on an application page suggests the job is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExpiredPattern {
    pub phrase: &'static str,
    pub confidence: Confidence,
    pub category: PatternCategory,
}

impl ExpiredPattern {
    pub const fn new(
        phrase: &'static str,
        confidence: Confidence,
        category: PatternCategory,
    ) -> Self {
        Self {
            phrase,
            confidence,
            category,
        }
    }
}

/// Job posting fields the liveness pipeline reads and writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPosting {
    pub id: Uuid,
    pub application_url: Option<String>,
    pub status: JobStatus,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub check_count: i32,
    pub check_method: Option<CheckMethod>,
    pub expired_evidence: Option<String>,
    pub check_failure_reason: Option<String>,
}

impl JobPosting {
    pub fn new(id: Uuid, application_url: Option<String>, status: JobStatus) -> Self {
        Self {
            id,
            application_url,
            status,
            last_checked_at: None,
            check_count: 0,
            check_method: None,
            expired_evidence: None,
            check_failure_reason: None,
        }
    }

    /// Whether the posting should be picked by a run whose interval cutoff is `cutoff`.
    pub fn is_due(&self, cutoff: DateTime<Utc>) -> bool {
        self.status == JobStatus::Approved
            && self.application_url.is_some()
            && self.last_checked_at.map_or(true, |at| at < cutoff)
    }

    pub fn apply_update(&mut self, update: &PostingUpdate) {
        self.last_checked_at = Some(update.checked_at);
        self.check_count += 1;
        self.check_method = Some(update.method);
        match &update.transition {
            None => {}
            Some(StatusTransition::Expired { evidence }) => {
                self.status = JobStatus::Expired;
                self.expired_evidence = Some(evidence.clone());
            }
            Some(StatusTransition::NeedsReview { reason }) => {
                self.status = JobStatus::NeedsReview;
                self.check_failure_reason = Some(reason.clone());
            }
        }
    }
}

/// A posting selected for checking; `application_url` is guaranteed present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DueJob {
    pub id: Uuid,
    pub application_url: String,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub check_count: i32,
}

/// Append-only audit row written once per check attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckLogEntry {
    pub job_id: Uuid,
    pub check_method: CheckMethod,
    pub status_code: Option<u16>,
    pub evidence_found: Vec<String>,
    pub decision: DecisionKind,
    pub error_message: Option<String>,
    pub response_time_ms: u64,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StatusTransition {
    Expired { evidence: String },
    NeedsReview { reason: String },
}

impl StatusTransition {
    pub fn status(&self) -> JobStatus {
        match self {
            Self::Expired { .. } => JobStatus::Expired,
            Self::NeedsReview { .. } => JobStatus::NeedsReview,
        }
    }
}

/// Writes applied to a posting after a check; `check_count` is always bumped by one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingUpdate {
    pub checked_at: DateTime<Utc>,
    pub method: CheckMethod,
    pub transition: Option<StatusTransition>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, hour, 0, 0).single().unwrap()
    }

    #[test]
    fn status_strings_round_trip_through_from_str() {
        for status in [
            JobStatus::Pending,
            JobStatus::Approved,
            JobStatus::Rejected,
            JobStatus::Expired,
            JobStatus::NeedsReview,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("archived".parse::<JobStatus>().is_err());
    }

    #[test]
    fn confidence_orders_high_above_everything() {
        assert!(Confidence::High > Confidence::Medium);
        assert!(Confidence::Medium > Confidence::Low);
        assert!(Confidence::Low > Confidence::None);
    }

    #[test]
    fn check_result_serializes_decision_tag_flat() {
        let result = CheckResult {
            method: CheckMethod::Http,
            verdict: Verdict::MarkExpired {
                evidence: vec!["HTTP 410".into()],
            },
            status_code: Some(410),
            response_time_ms: 12,
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["method"], "http");
        assert_eq!(value["decision"], "mark_expired");
        assert_eq!(value["evidence"][0], "HTTP 410");
        assert_eq!(value["statusCode"], 410);
        assert_eq!(value["responseTimeMs"], 12);
        assert!(value.get("errorMessage").is_none());
    }

    #[test]
    fn timed_out_check_serializes_camel_case_error_message() {
        let result = CheckResult {
            method: CheckMethod::Error,
            verdict: Verdict::NeedsReview {
                evidence: vec![],
                error_message: Some("request timed out after 15s".into()),
            },
            status_code: None,
            response_time_ms: 15_000,
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["decision"], "needs_review");
        assert_eq!(value["errorMessage"], "request timed out after 15s");
        assert_eq!(value["responseTimeMs"], 15_000);
        assert!(value.get("statusCode").is_none());
        assert!(value.get("evidence").is_none());

        let back: CheckResult = serde_json::from_value(value).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn needs_review_update_prefers_error_message_over_evidence() {
        let result = CheckResult {
            method: CheckMethod::Error,
            verdict: Verdict::NeedsReview {
                evidence: vec!["ignored".into()],
                error_message: Some("request timed out".into()),
            },
            status_code: None,
            response_time_ms: 15_000,
        };
        let update = result.posting_update(ts(1));
        assert_eq!(
            update.transition,
            Some(StatusTransition::NeedsReview {
                reason: "request timed out".into()
            })
        );
    }

    #[test]
    fn applying_updates_tracks_checks_and_transitions() {
        let mut job = JobPosting::new(
            Uuid::new_v4(),
            Some("https://jobs.example.com/1".into()),
            JobStatus::Approved,
        );
        let keep = CheckResult {
            method: CheckMethod::HtmlScan,
            verdict: Verdict::KeepActive { evidence: vec![] },
            status_code: Some(200),
            response_time_ms: 40,
        };
        job.apply_update(&keep.posting_update(ts(1)));
        assert_eq!(job.status, JobStatus::Approved);
        assert_eq!(job.check_count, 1);

        let expire = CheckResult {
            method: CheckMethod::Http,
            verdict: Verdict::MarkExpired {
                evidence: vec!["HTTP 404".into()],
            },
            status_code: Some(404),
            response_time_ms: 40,
        };
        job.apply_update(&expire.posting_update(ts(2)));
        assert_eq!(job.status, JobStatus::Expired);
        assert_eq!(job.check_count, 2);
        assert_eq!(job.expired_evidence.as_deref(), Some("HTTP 404"));
        assert_eq!(job.last_checked_at, Some(ts(2)));
    }

    #[test]
    fn due_requires_approved_url_and_stale_check() {
        let cutoff = ts(12);
        let mut job = JobPosting::new(Uuid::new_v4(), Some("https://a".into()), JobStatus::Approved);
        assert!(job.is_due(cutoff));

        job.last_checked_at = Some(cutoff + Duration::hours(1));
        assert!(!job.is_due(cutoff));

        job.last_checked_at = Some(cutoff - Duration::hours(1));
        assert!(job.is_due(cutoff));

        job.status = JobStatus::NeedsReview;
        assert!(!job.is_due(cutoff));

        let no_url = JobPosting::new(Uuid::new_v4(), None, JobStatus::Approved);
        assert!(!no_url.is_due(cutoff));
    }
}

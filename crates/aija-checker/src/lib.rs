//! Liveness checks for job application URLs: phrase classifier + HTTP checker.

use std::error::Error as StdError;
use std::time::Instant;

use aija_core::Confidence::{High, Low, Medium};
use aija_core::PatternCategory::{Closed, Expired, Filled, Removed};
use aija_core::{CheckMethod, CheckResult, Confidence, ExpiredPattern, Verdict};
use aija_storage::{FetchError, HttpFetcher, ProbeMethod, ProbeResponse};
use async_trait::async_trait;
use reqwest::StatusCode;
use scraper::{Html, Selector};
use serde::Serialize;
use tracing::{debug, warn};

pub const CRATE_NAME: &str = "aija-checker";

/// Phrases (lowercase, single-spaced) that indicate a posting is gone.
///
/// No phrase is a substring of another, so one sentence yields one match.
pub const EXPIRED_PATTERNS: &[ExpiredPattern] = &[
    ExpiredPattern::new("job has expired", High, Expired),
    ExpiredPattern::new("posting has expired", High, Expired),
    ExpiredPattern::new("listing has expired", High, Expired),
    ExpiredPattern::new("vacancy has expired", High, Expired),
    ExpiredPattern::new("position has been filled", High, Filled),
    ExpiredPattern::new("role has been filled", High, Filled),
    ExpiredPattern::new("job has been filled", High, Filled),
    ExpiredPattern::new("no longer accepting applications", High, Closed),
    ExpiredPattern::new("applications have closed", High, Closed),
    ExpiredPattern::new("this job is closed", High, Closed),
    ExpiredPattern::new("job is no longer available", High, Removed),
    ExpiredPattern::new("position is no longer available", High, Removed),
    ExpiredPattern::new("job has been removed", High, Removed),
    ExpiredPattern::new("position has been closed", Medium, Closed),
    ExpiredPattern::new("closing date has passed", Medium, Closed),
    ExpiredPattern::new("not accepting applications", Medium, Closed),
    ExpiredPattern::new("no longer active", Medium, Expired),
    ExpiredPattern::new("job not found", Medium, Removed),
    ExpiredPattern::new("page not found", Medium, Removed),
    ExpiredPattern::new("temporarily unavailable", Medium, Removed),
    ExpiredPattern::new("applications closed", Low, Closed),
    ExpiredPattern::new("page doesn't exist", Low, Removed),
    ExpiredPattern::new("could not be found", Low, Removed),
    ExpiredPattern::new("has been archived", Low, Removed),
    ExpiredPattern::new("may have been removed", Low, Removed),
];

pub const DEFINITELY_EXPIRED_STATUSES: &[u16] = &[404, 410];
pub const PROBABLY_EXPIRED_STATUSES: &[u16] = &[403, 500, 503];
pub const TEMPORARY_ISSUE_STATUSES: &[u16] = &[429, 502, 504];

/// Statuses meaning the server refuses HEAD itself, not that the page is gone.
const HEAD_REFUSED_STATUSES: &[u16] = &[405, 501];

/// Elements whose text is page chrome rather than posting content.
const STRIPPED_ELEMENTS: &[&str] = &["script", "style", "nav", "header", "footer", "iframe"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    DefinitelyExpired,
    ProbablyExpired,
    TemporaryIssue,
    Success,
    Unclassified,
}

pub fn classify_status(status: StatusCode) -> StatusClass {
    let code = status.as_u16();
    if DEFINITELY_EXPIRED_STATUSES.contains(&code) {
        StatusClass::DefinitelyExpired
    } else if PROBABLY_EXPIRED_STATUSES.contains(&code) {
        StatusClass::ProbablyExpired
    } else if TEMPORARY_ISSUE_STATUSES.contains(&code) {
        StatusClass::TemporaryIssue
    } else if status.is_success() {
        StatusClass::Success
    } else {
        StatusClass::Unclassified
    }
}

/// Verdict implied by the status alone, or `None` for 2xx responses.
fn status_verdict(status: StatusCode) -> Option<Verdict> {
    let code = status.as_u16();
    let verdict = match classify_status(status) {
        StatusClass::Success => return None,
        StatusClass::DefinitelyExpired => Verdict::MarkExpired {
            evidence: vec![format!("HTTP {code}")],
        },
        StatusClass::ProbablyExpired => Verdict::NeedsReview {
            evidence: vec![format!("HTTP {code} (possibly expired or access blocked)")],
            error_message: None,
        },
        StatusClass::TemporaryIssue => Verdict::NeedsReview {
            evidence: vec![format!("HTTP {code} (temporary issue, re-check later)")],
            error_message: None,
        },
        StatusClass::Unclassified => Verdict::KeepActive {
            evidence: vec![format!("HTTP {code} (unclassified)")],
        },
    };
    Some(verdict)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanResult {
    pub found: Vec<ExpiredPattern>,
    pub confidence: Confidence,
    pub should_expire: bool,
    pub should_review: bool,
}

/// Match `text` case-insensitively against [`EXPIRED_PATTERNS`].
pub fn scan_for_expired_patterns(text: &str) -> ScanResult {
    let haystack = normalize_whitespace(&text.to_lowercase().replace('\u{2019}', "'"));
    let found = EXPIRED_PATTERNS
        .iter()
        .filter(|p| haystack.contains(p.phrase))
        .copied()
        .collect::<Vec<_>>();

    let confidence = found
        .iter()
        .map(|p| p.confidence)
        .max()
        .unwrap_or(Confidence::None);
    let should_expire = confidence == Confidence::High;
    let should_review = !should_expire && !found.is_empty();

    ScanResult {
        found,
        confidence,
        should_expire,
        should_review,
    }
}

/// Visible body text of an HTML document with page chrome removed.
pub fn extract_page_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let root = Selector::parse("body")
        .ok()
        .and_then(|sel| document.select(&sel).next())
        .unwrap_or_else(|| document.root_element());

    let mut parts = Vec::new();
    for node in root.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let in_chrome = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|el| STRIPPED_ELEMENTS.contains(&el.name()))
        });
        if !in_chrome {
            parts.push(&**text);
        }
    }
    normalize_whitespace(&parts.join(" "))
}

fn normalize_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn describe_error(err: &FetchError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        let text = inner.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = inner.source();
    }
    message
}

/// Anything that can resolve an application URL to a [`CheckResult`].
#[async_trait]
pub trait LivenessCheck: Send + Sync {
    /// Never fails: every error is folded into a `needs_review` result.
    async fn check(&self, url: &str) -> CheckResult;
}

pub struct UrlChecker {
    http: HttpFetcher,
    scan_content: bool,
}

struct Outcome {
    method: CheckMethod,
    verdict: Verdict,
    status_code: Option<u16>,
}

impl Outcome {
    fn new(method: CheckMethod, verdict: Verdict, status: StatusCode) -> Self {
        Self {
            method,
            verdict,
            status_code: Some(status.as_u16()),
        }
    }
}

impl UrlChecker {
    pub fn new(http: HttpFetcher, scan_content: bool) -> Self {
        Self { http, scan_content }
    }

    pub async fn check_job_url(&self, url: &str) -> CheckResult {
        let started = Instant::now();
        let outcome = self.run_check(url).await;
        let response_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match outcome {
            Ok(outcome) => CheckResult {
                method: outcome.method,
                verdict: outcome.verdict,
                status_code: outcome.status_code,
                response_time_ms,
            },
            Err(err) => {
                let message = describe_error(&err);
                warn!(url, error = %message, "liveness check failed");
                CheckResult {
                    method: CheckMethod::Error,
                    verdict: Verdict::NeedsReview {
                        evidence: Vec::new(),
                        error_message: Some(message),
                    },
                    status_code: None,
                    response_time_ms,
                }
            }
        }
    }

    async fn run_check(&self, url: &str) -> Result<Outcome, FetchError> {
        let probe = self.initial_probe(url).await?;
        if let Some(verdict) = status_verdict(probe.status) {
            return Ok(Outcome::new(CheckMethod::Http, verdict, probe.status));
        }

        let keep_active = |status: StatusCode| {
            Outcome::new(
                CheckMethod::Http,
                Verdict::KeepActive {
                    evidence: Vec::new(),
                },
                status,
            )
        };
        if !self.scan_content {
            return Ok(keep_active(probe.status));
        }

        // Only a GET that came back as html carries a body worth reusing.
        let page = if probe.html.is_some() {
            probe
        } else {
            let page = self.http.probe(ProbeMethod::Get, url).await?;
            if let Some(verdict) = status_verdict(page.status) {
                return Ok(Outcome::new(CheckMethod::Http, verdict, page.status));
            }
            page
        };
        let status = page.status;
        let Some(html) = page.html else {
            debug!(url, content_type = ?page.content_type, "not an html page, skipping scan");
            return Ok(keep_active(status));
        };

        let scan = scan_for_expired_patterns(&extract_page_text(&html));
        let verdict = if scan.should_expire {
            Verdict::MarkExpired {
                evidence: scan.found.iter().map(|p| p.phrase.to_string()).collect(),
            }
        } else if scan.should_review {
            Verdict::NeedsReview {
                evidence: scan
                    .found
                    .iter()
                    .map(|p| format!("{} ({} confidence)", p.phrase, p.confidence))
                    .collect(),
                error_message: None,
            }
        } else {
            Verdict::KeepActive {
                evidence: Vec::new(),
            }
        };
        Ok(Outcome::new(CheckMethod::HtmlScan, verdict, status))
    }

    /// HEAD first; GET when HEAD errors out or the server refuses the method.
    async fn initial_probe(&self, url: &str) -> Result<ProbeResponse, FetchError> {
        match self.http.probe(ProbeMethod::Head, url).await {
            Ok(resp) if HEAD_REFUSED_STATUSES.contains(&resp.status.as_u16()) => {
                debug!(url, status = resp.status.as_u16(), "HEAD refused, retrying as GET");
                self.http.probe(ProbeMethod::Get, url).await
            }
            Ok(resp) => Ok(resp),
            Err(err) => {
                debug!(url, error = %err, "HEAD failed, retrying as GET");
                self.http.probe(ProbeMethod::Get, url).await
            }
        }
    }
}

#[async_trait]
impl LivenessCheck for UrlChecker {
    async fn check(&self, url: &str) -> CheckResult {
        self.check_job_url(url).await
    }
}

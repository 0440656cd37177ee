use std::time::Duration;

use aija_checker::{LivenessCheck, UrlChecker};
use aija_core::{CheckMethod, DecisionKind, Verdict};
use aija_storage::{HttpClientConfig, HttpFetcher};
use httpmock::prelude::*;
use httpmock::Method::HEAD;

fn checker(scan_content: bool) -> UrlChecker {
    let http = HttpFetcher::new(HttpClientConfig::default()).expect("http client");
    UrlChecker::new(http, scan_content)
}

fn html_page(body: &str) -> String {
    format!(
        "<!doctype html><html><head><title>Careers</title></head>\
         <body><nav>Jobs | About</nav><main>{body}</main><footer>(c) Example Pty Ltd</footer></body></html>"
    )
}

#[tokio::test]
async fn gone_status_marks_expired_without_scanning() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.path("/jobs/gone");
            then.status(410);
        })
        .await;

    let result = checker(true).check_job_url(&server.url("/jobs/gone")).await;

    assert_eq!(result.method, CheckMethod::Http);
    assert_eq!(result.status_code, Some(410));
    assert_eq!(
        result.verdict,
        Verdict::MarkExpired {
            evidence: vec!["HTTP 410".to_string()]
        }
    );
    // HEAD answered; no GET needed.
    mock.assert_hits_async(1).await;
}

#[tokio::test]
async fn ambiguous_statuses_need_review() {
    for code in [403u16, 429, 500, 502, 503, 504] {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.path("/jobs/1");
                then.status(code);
            })
            .await;

        let result = checker(true).check_job_url(&server.url("/jobs/1")).await;
        assert_eq!(result.decision(), DecisionKind::NeedsReview, "status {code}");
        assert_eq!(result.method, CheckMethod::Http);
        assert_eq!(result.status_code, Some(code));
        assert!(result.evidence()[0].starts_with(&format!("HTTP {code} (")));
    }
}

#[tokio::test]
async fn filled_position_page_is_expired_by_html_scan() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.path("/jobs/filled");
            then.status(200)
                .header("content-type", "text/html; charset=utf-8")
                .body(html_page("<h1>ML Engineer</h1><p>This position has been filled.</p>"));
        })
        .await;

    let result = checker(true).check_job_url(&server.url("/jobs/filled")).await;

    assert_eq!(result.method, CheckMethod::HtmlScan);
    assert_eq!(result.status_code, Some(200));
    assert_eq!(
        result.verdict,
        Verdict::MarkExpired {
            evidence: vec!["position has been filled".to_string()]
        }
    );
    // HEAD, then a GET for the body.
    mock.assert_hits_async(2).await;
}

#[tokio::test]
async fn medium_confidence_phrase_needs_review() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.path("/jobs/flaky");
            then.status(200)
                .header("content-type", "text/html")
                .body(html_page("<p>This page is temporarily unavailable.</p>"));
        })
        .await;

    let result = checker(true).check_job_url(&server.url("/jobs/flaky")).await;

    assert_eq!(result.method, CheckMethod::HtmlScan);
    assert_eq!(
        result.verdict,
        Verdict::NeedsReview {
            evidence: vec!["temporarily unavailable (medium confidence)".to_string()],
            error_message: None,
        }
    );
}

#[tokio::test]
async fn live_page_stays_active_and_rechecks_agree() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.path("/jobs/live");
            then.status(200)
                .header("content-type", "text/html")
                .body(html_page("<h1>Data Engineer</h1><p>Apply before Friday.</p>"));
        })
        .await;

    let checker = checker(true);
    let url = server.url("/jobs/live");
    let first = checker.check(&url).await;
    let second = checker.check(&url).await;

    assert_eq!(first.method, CheckMethod::HtmlScan);
    assert_eq!(first.decision(), DecisionKind::KeepActive);
    assert_eq!(first.verdict, second.verdict);
    assert_eq!(first.method, second.method);
}

#[tokio::test]
async fn phrases_in_page_chrome_are_ignored() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.path("/jobs/chrome");
            then.status(200).header("content-type", "text/html").body(
                "<html><body><header>Job has expired? Search again</header>\
                 <main>Research Scientist</main></body></html>",
            );
        })
        .await;

    let result = checker(true).check_job_url(&server.url("/jobs/chrome")).await;
    assert_eq!(result.decision(), DecisionKind::KeepActive);
}

#[tokio::test]
async fn scanning_disabled_keeps_ok_pages_active_over_http() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.path("/jobs/filled");
            then.status(200)
                .header("content-type", "text/html")
                .body(html_page("This position has been filled."));
        })
        .await;

    let result = checker(false).check_job_url(&server.url("/jobs/filled")).await;

    assert_eq!(result.method, CheckMethod::Http);
    assert_eq!(result.decision(), DecisionKind::KeepActive);
    mock.assert_hits_async(1).await;
}

#[tokio::test]
async fn non_html_documents_are_not_scanned() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.path("/jobs/description.pdf");
            then.status(200)
                .header("content-type", "application/pdf")
                .body("%PDF-1.7 job has expired");
        })
        .await;

    let result = checker(true)
        .check_job_url(&server.url("/jobs/description.pdf"))
        .await;
    assert_eq!(result.method, CheckMethod::Http);
    assert_eq!(result.decision(), DecisionKind::KeepActive);
}

#[tokio::test]
async fn head_refused_falls_back_to_get() {
    let server = MockServer::start_async().await;
    let head = server
        .mock_async(|when, then| {
            when.method(HEAD).path("/jobs/no-head");
            then.status(405);
        })
        .await;
    let get = server
        .mock_async(|when, then| {
            when.method(GET).path("/jobs/no-head");
            then.status(200)
                .header("content-type", "text/html")
                .body(html_page("Sorry, this job has expired."));
        })
        .await;

    let result = checker(true).check_job_url(&server.url("/jobs/no-head")).await;

    head.assert_hits_async(1).await;
    // The fallback GET body is reused for the scan.
    get.assert_hits_async(1).await;
    assert_eq!(result.method, CheckMethod::HtmlScan);
    assert_eq!(
        result.verdict,
        Verdict::MarkExpired {
            evidence: vec!["job has expired".to_string()]
        }
    );
}

#[tokio::test]
async fn head_timeout_retries_as_get() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(HEAD).path("/jobs/slow-head");
            then.status(200).delay(Duration::from_millis(1_500));
        })
        .await;
    let get = server
        .mock_async(|when, then| {
            when.method(GET).path("/jobs/slow-head");
            then.status(404);
        })
        .await;

    let http = HttpFetcher::new(HttpClientConfig {
        timeout: Duration::from_millis(300),
        ..Default::default()
    })
    .expect("http client");
    let result = UrlChecker::new(http, true)
        .check_job_url(&server.url("/jobs/slow-head"))
        .await;

    get.assert_hits_async(1).await;
    assert_eq!(result.decision(), DecisionKind::MarkExpired);
    assert_eq!(result.status_code, Some(404));
}

#[tokio::test]
async fn timeouts_resolve_to_review_with_error_message() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.path("/jobs/hang");
            then.status(200).delay(Duration::from_millis(1_500));
        })
        .await;

    let http = HttpFetcher::new(HttpClientConfig {
        timeout: Duration::from_millis(200),
        ..Default::default()
    })
    .expect("http client");
    let result = UrlChecker::new(http, true)
        .check_job_url(&server.url("/jobs/hang"))
        .await;

    assert_eq!(result.method, CheckMethod::Error);
    assert_eq!(result.decision(), DecisionKind::NeedsReview);
    assert_eq!(result.status_code, None);
    let message = result.error_message().expect("error message");
    assert!(message.contains("timed out"), "{message}");
}

#[tokio::test]
async fn unreachable_and_malformed_urls_never_fail_the_caller() {
    let checker = checker(true);
    for url in ["http://127.0.0.1:9/jobs/1", "not a url", ""] {
        let result = checker.check_job_url(url).await;
        assert_eq!(result.method, CheckMethod::Error, "{url:?}");
        assert_eq!(result.decision(), DecisionKind::NeedsReview);
        assert!(!result.error_message().unwrap_or_default().is_empty());
    }
}

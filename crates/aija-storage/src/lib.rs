//! Job posting persistence + HTTP probe utilities for the liveness pipeline.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use aija_core::{CheckLogEntry, DueJob, JobPosting, PostingUpdate, StatusTransition};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::CONTENT_TYPE;
use reqwest::redirect::Policy;
use reqwest::StatusCode;
use sqlx::{PgPool, Row};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

pub const CRATE_NAME: &str = "aija-storage";

pub const DEFAULT_USER_AGENT: &str =
    "AIJobsAustralia-LinkChecker/1.0 (+https://aijobsaustralia.com.au)";

/// Persistence operations the batch runner needs.
///
/// Implementations must make `update_posting` bump `check_count` by exactly
/// one per call, and keep check logs append-only.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Approved postings with an application URL whose last check is older
    /// than `cutoff` (or missing), never-checked first, then oldest first.
    async fn select_due_jobs(
        &self,
        batch_size: usize,
        cutoff: DateTime<Utc>,
    ) -> anyhow::Result<Vec<DueJob>>;

    async fn insert_check_log(&self, entry: &CheckLogEntry) -> anyhow::Result<()>;

    async fn update_posting(&self, job_id: Uuid, update: &PostingUpdate) -> anyhow::Result<()>;

    /// Returns `false` when another holder owns an unexpired lock named `name`.
    async fn try_acquire_run_lock(
        &self,
        name: &str,
        holder: Uuid,
        ttl: Duration,
    ) -> anyhow::Result<bool>;

    async fn release_run_lock(&self, name: &str, holder: Uuid) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn select_due_jobs(
        &self,
        batch_size: usize,
        cutoff: DateTime<Utc>,
    ) -> anyhow::Result<Vec<DueJob>> {
        let limit = i64::try_from(batch_size).context("batch size exceeds i64")?;
        let rows = sqlx::query(
            r#"
            SELECT id,
                   application_url,
                   last_checked_at,
                   COALESCE(check_count, 0) AS check_count
              FROM jobs
             WHERE status = 'approved'
               AND application_url IS NOT NULL
               AND (last_checked_at IS NULL OR last_checked_at < $1)
             ORDER BY last_checked_at ASC NULLS FIRST
             LIMIT $2
            "#,
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("selecting jobs due for a liveness check")?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(DueJob {
                id: row.try_get("id")?,
                application_url: row.try_get("application_url")?,
                last_checked_at: row.try_get("last_checked_at")?,
                check_count: row.try_get("check_count")?,
            });
        }
        Ok(out)
    }

    async fn insert_check_log(&self, entry: &CheckLogEntry) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO job_check_logs
                   (job_id, check_method, status_code, evidence_found, decision,
                    error_message, response_time_ms, checked_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.job_id)
        .bind(entry.check_method.as_str())
        .bind(entry.status_code.map(i32::from))
        .bind(entry.evidence_found.as_slice())
        .bind(entry.decision.as_str())
        .bind(entry.error_message.as_deref())
        .bind(i64::try_from(entry.response_time_ms).unwrap_or(i64::MAX))
        .bind(entry.checked_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("inserting check log for job {}", entry.job_id))?;
        Ok(())
    }

    async fn update_posting(&self, job_id: Uuid, update: &PostingUpdate) -> anyhow::Result<()> {
        let status = update.transition.as_ref().map(|t| t.status().as_str());
        let (expired_evidence, failure_reason) = match &update.transition {
            None => (None, None),
            Some(StatusTransition::Expired { evidence }) => (Some(evidence.as_str()), None),
            Some(StatusTransition::NeedsReview { reason }) => (None, Some(reason.as_str())),
        };

        let result = sqlx::query(
            r#"
            UPDATE jobs
               SET last_checked_at = $2,
                   check_count = COALESCE(check_count, 0) + 1,
                   check_method = $3,
                   status = COALESCE($4, status),
                   expired_evidence = COALESCE($5, expired_evidence),
                   check_failure_reason = COALESCE($6, check_failure_reason)
             WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(update.checked_at)
        .bind(update.method.as_str())
        .bind(status)
        .bind(expired_evidence)
        .bind(failure_reason)
        .execute(&self.pool)
        .await
        .with_context(|| format!("updating job posting {job_id}"))?;

        if result.rows_affected() == 0 {
            anyhow::bail!("job posting {job_id} not found");
        }
        Ok(())
    }

    async fn try_acquire_run_lock(
        &self,
        name: &str,
        holder: Uuid,
        ttl: Duration,
    ) -> anyhow::Result<bool> {
        let row = sqlx::query(
            r#"
            INSERT INTO cron_run_locks (name, holder, locked_until)
            VALUES ($1, $2, NOW() + make_interval(secs => $3))
            ON CONFLICT (name) DO UPDATE
               SET holder = EXCLUDED.holder,
                   locked_until = EXCLUDED.locked_until
             WHERE cron_run_locks.locked_until < NOW()
            RETURNING holder
            "#,
        )
        .bind(name)
        .bind(holder)
        .bind(ttl.as_secs_f64())
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("acquiring run lock {name}"))?;
        Ok(row.is_some())
    }

    async fn release_run_lock(&self, name: &str, holder: Uuid) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM cron_run_locks WHERE name = $1 AND holder = $2")
            .bind(name)
            .bind(holder)
            .execute(&self.pool)
            .await
            .with_context(|| format!("releasing run lock {name}"))?;
        Ok(())
    }
}

/// In-process store with failure injection, used by the runner and web tests.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    jobs: Vec<JobPosting>,
    logs: Vec<CheckLogEntry>,
    locks: HashMap<String, (Uuid, DateTime<Utc>)>,
    failing_updates: HashSet<Uuid>,
    failing_logs: HashSet<Uuid>,
    fail_selection: bool,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_jobs(jobs: impl IntoIterator<Item = JobPosting>) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                jobs: jobs.into_iter().collect(),
                ..Default::default()
            }),
        }
    }

    pub async fn job(&self, id: Uuid) -> Option<JobPosting> {
        self.state
            .lock()
            .await
            .jobs
            .iter()
            .find(|j| j.id == id)
            .cloned()
    }

    pub async fn check_logs(&self) -> Vec<CheckLogEntry> {
        self.state.lock().await.logs.clone()
    }

    /// Make every `update_posting` for `job_id` fail.
    pub async fn fail_updates_for(&self, job_id: Uuid) {
        self.state.lock().await.failing_updates.insert(job_id);
    }

    /// Make every `insert_check_log` for `job_id` fail.
    pub async fn fail_logs_for(&self, job_id: Uuid) {
        self.state.lock().await.failing_logs.insert(job_id);
    }

    pub async fn set_fail_selection(&self, fail: bool) {
        self.state.lock().await.fail_selection = fail;
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn select_due_jobs(
        &self,
        batch_size: usize,
        cutoff: DateTime<Utc>,
    ) -> anyhow::Result<Vec<DueJob>> {
        let state = self.state.lock().await;
        if state.fail_selection {
            anyhow::bail!("selection failed: store unavailable");
        }

        let mut due = state
            .jobs
            .iter()
            .filter(|j| j.is_due(cutoff))
            .collect::<Vec<_>>();
        // `None` sorts before `Some`, which gives never-checked rows first.
        due.sort_by_key(|j| j.last_checked_at);

        Ok(due
            .into_iter()
            .take(batch_size)
            .filter_map(|j| {
                Some(DueJob {
                    id: j.id,
                    application_url: j.application_url.clone()?,
                    last_checked_at: j.last_checked_at,
                    check_count: j.check_count,
                })
            })
            .collect())
    }

    async fn insert_check_log(&self, entry: &CheckLogEntry) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        if state.failing_logs.contains(&entry.job_id) {
            anyhow::bail!("inserting check log for job {} failed", entry.job_id);
        }
        state.logs.push(entry.clone());
        Ok(())
    }

    async fn update_posting(&self, job_id: Uuid, update: &PostingUpdate) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        if state.failing_updates.contains(&job_id) {
            anyhow::bail!("updating job posting {job_id} failed");
        }
        let job = state
            .jobs
            .iter_mut()
            .find(|j| j.id == job_id)
            .with_context(|| format!("job posting {job_id} not found"))?;
        job.apply_update(update);
        Ok(())
    }

    async fn try_acquire_run_lock(
        &self,
        name: &str,
        holder: Uuid,
        ttl: Duration,
    ) -> anyhow::Result<bool> {
        let ttl = chrono::Duration::from_std(ttl).context("run lock ttl out of range")?;
        let now = Utc::now();
        let mut state = self.state.lock().await;
        if let Some((_, until)) = state.locks.get(name) {
            if *until >= now {
                return Ok(false);
            }
        }
        state.locks.insert(name.to_string(), (holder, now + ttl));
        Ok(true)
    }

    async fn release_run_lock(&self, name: &str, holder: Uuid) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        if state.locks.get(name).is_some_and(|(owner, _)| *owner == holder) {
            state.locks.remove(name);
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub max_redirects: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            user_agent: Some(DEFAULT_USER_AGENT.to_string()),
            max_redirects: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMethod {
    Head,
    Get,
}

#[derive(Debug, Clone)]
pub struct ProbeResponse {
    pub method: ProbeMethod,
    pub status: StatusCode,
    pub final_url: String,
    pub content_type: Option<String>,
    /// Body text, read only for GET responses served as `text/html`.
    pub html: Option<String>,
}

impl ProbeResponse {
    pub fn is_html(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("text/html"))
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} timed out after {timeout_secs}s")]
    Timeout { url: String, timeout_secs: u64 },
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Single-request HTTP prober: every call gets its own client-level timeout.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .redirect(Policy::limited(config.max_redirects));

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            timeout: config.timeout,
        })
    }

    pub async fn probe(&self, method: ProbeMethod, url: &str) -> Result<ProbeResponse, FetchError> {
        let request = match method {
            ProbeMethod::Head => self.client.head(url),
            ProbeMethod::Get => self.client.get(url),
        };
        let resp = request.send().await.map_err(|err| self.map_error(url, err))?;

        let status = resp.status();
        let final_url = resp.url().to_string();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);

        let mut probe = ProbeResponse {
            method,
            status,
            final_url,
            content_type,
            html: None,
        };
        if method == ProbeMethod::Get && probe.is_html() {
            probe.html = Some(resp.text().await.map_err(|err| self.map_error(url, err))?);
        }

        debug!(url, ?method, status = status.as_u16(), final_url = %probe.final_url, "probe complete");
        Ok(probe)
    }

    fn map_error(&self, url: &str, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
                timeout_secs: self.timeout.as_secs(),
            }
        } else {
            FetchError::Request(err)
        }
    }
}

//! Axum trigger endpoint for scheduled liveness runs.

use std::sync::Arc;

use aija_sync::{LivenessRun, RunError, RunStats};
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

pub const CRATE_NAME: &str = "aija-web";

pub const CHECK_JOB_URLS_ROUTE: &str = "/api/cron/check-job-urls";

#[derive(Clone)]
pub struct AppState {
    pub cron_secret: Option<String>,
    pub runner: Arc<dyn LivenessRun>,
}

impl AppState {
    pub fn new(cron_secret: Option<String>, runner: Arc<dyn LivenessRun>) -> Self {
        Self {
            cron_secret,
            runner,
        }
    }
}

#[derive(Debug, Serialize)]
struct RunResponse {
    message: String,
    stats: RunStats,
    timestamp: DateTime<Utc>,
    duration: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(
            CHECK_JOB_URLS_ROUTE,
            get(check_job_urls_handler).post(check_job_urls_handler),
        )
        .with_state(Arc::new(state))
}

pub async fn serve(port: u16, state: AppState) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, route = CHECK_JOB_URLS_ROUTE, "liveness trigger listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health_handler() -> Response {
    Json(serde_json::json!({ "status": "ok" })).into_response()
}

async fn check_job_urls_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let Some(secret) = state.cron_secret.as_deref() else {
        error!("CRON_SECRET is not configured; refusing liveness trigger");
        return json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "CRON_SECRET is not configured",
            None,
        );
    };
    if !bearer_matches(&headers, secret) {
        warn!("rejected liveness trigger with missing or invalid bearer token");
        return json_error(StatusCode::UNAUTHORIZED, "Unauthorized", None);
    }

    match state.runner.run_once().await {
        Ok(summary) => Json(RunResponse {
            message: format!("Checked {} job application URLs", summary.stats.checked),
            stats: summary.stats,
            timestamp: summary.finished_at,
            duration: format!("{}ms", summary.duration_ms),
        })
        .into_response(),
        Err(err @ RunError::AlreadyRunning) => json_error(
            StatusCode::CONFLICT,
            "Liveness run already in progress",
            Some(err.to_string()),
        ),
        Err(err) => {
            error!(error = %err, "liveness run failed");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Liveness run failed",
                Some(err.to_string()),
            )
        }
    }
}

fn bearer_matches(headers: &HeaderMap, secret: &str) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token.trim() == secret)
}

fn json_error(status: StatusCode, error: &str, message: Option<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            message,
        }),
    )
        .into_response()
}

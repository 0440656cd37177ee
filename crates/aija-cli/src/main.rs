use std::sync::Arc;

use aija_checker::UrlChecker;
use aija_storage::HttpFetcher;
use aija_sync::{LivenessConfig, LivenessRun};
use aija_web::AppState;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "aija-cli")]
#[command(about = "AI Jobs Australia listing liveness checker")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Check one batch of job postings that are due.
    Run,
    /// Check a single application URL and print the result as JSON.
    CheckUrl {
        url: String,
        /// Decide from the HTTP status only.
        #[arg(long)]
        no_scan: bool,
    },
    /// Serve the cron trigger endpoint, plus the in-process scheduler when enabled.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,aija=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let summary = aija_sync::run_once_from_env().await?;
            let stats = summary.stats;
            println!(
                "liveness run complete: run_id={} checked={} expired={} needs_review={} kept_active={} errors={} duration_ms={}",
                summary.run_id,
                stats.checked,
                stats.expired,
                stats.needs_review,
                stats.kept_active,
                stats.errors,
                summary.duration_ms
            );
        }
        Commands::CheckUrl { url, no_scan } => {
            let config = LivenessConfig::from_env();
            let http = HttpFetcher::new(config.http_client_config())?;
            let checker = UrlChecker::new(http, config.scan_content && !no_scan);
            let result = checker.check_job_url(&url).await;
            println!(
                "{}",
                serde_json::to_string_pretty(&result).context("serializing check result")?
            );
        }
        Commands::Serve => {
            let config = LivenessConfig::from_env();
            if config.cron_secret.is_none() {
                warn!("CRON_SECRET is not set; the trigger endpoint will refuse every request");
            }

            let runner: Arc<dyn LivenessRun> = Arc::new(aija_sync::build_runner(&config).await?);
            let scheduler = aija_sync::maybe_build_scheduler(&config, runner.clone()).await?;
            if let Some(sched) = &scheduler {
                sched.start().await.context("starting scheduler")?;
                info!(cron = %config.check_cron, "in-process liveness scheduler started");
            }

            aija_web::serve(config.web_port, AppState::new(config.cron_secret.clone(), runner))
                .await?;
        }
    }

    Ok(())
}

use std::sync::Arc;

use anyhow::{Context, Result};
use notification_service::{DiscordWebhookChannel, Dispatcher, LogChannel, NotificationChannel, RetryPolicy};
use reddit_feed::{RedditClient, RedditFeed};
use seen_store::SeenStore;
use tokio::signal::unix::SignalKind;
use tokio::sync::watch;

mod config;
mod metrics;
mod pipeline;
mod supervisor;

use config::MonitorConfig;
use metrics::PipelineStats;
use pipeline::Pipeline;
use supervisor::Supervisor;

/// Summary log cadence, in received submissions.
const STATS_LOG_INTERVAL: u64 = 100;

const USAGE: &str = "\
Usage: listing-monitor [--dry-run | --migrate-only]

  --dry-run       log notifications instead of posting them to the webhook
  --migrate-only  apply seen-store migrations and exit

Configuration is read from the environment (and .env).";

fn init_tracing() {
    let filter = || {
        std::env::var("WEMB_LOGLEVEL")
            .ok()
            .and_then(|level| tracing_subscriber::EnvFilter::try_new(level).ok())
            .or_else(|| tracing_subscriber::EnvFilter::try_from_default_env().ok())
            .unwrap_or_else(|| tracing_subscriber::EnvFilter::new("info"))
    };

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt().json().with_env_filter(filter()).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    // Panic hook: log panic info before crashing
    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "-h" || a == "--help") {
        println!("{}", USAGE);
        return Ok(());
    }
    if let Some(unknown) = args
        .iter()
        .find(|a| !matches!(a.as_str(), "--dry-run" | "--migrate-only"))
    {
        anyhow::bail!("Unknown argument {:?}\n\n{}", unknown, USAGE);
    }
    let dry_run = args.iter().any(|a| a == "--dry-run");

    if args.iter().any(|a| a == "--migrate-only") {
        let database_url = config::database_url_from_env();
        let seen = SeenStore::open(&database_url)
            .await
            .with_context(|| format!("Failed to open seen-store at {}", database_url))?;
        tracing::info!("Migrations applied to {} ({} seen submissions)", database_url, seen.len());
        seen.close().await;
        return Ok(());
    }

    tracing::info!("Starting Watch Exchange Monitor Bot");

    let config = MonitorConfig::from_env(dry_run)?;
    tracing::info!("Configuration loaded and validated");
    tracing::info!("  Rules: {} from {}", config.rules.len(), config.rules_path.display());
    for rule in &config.rules {
        tracing::info!("    {}", rule);
    }
    tracing::info!("  Subreddit: r/{}", config.subreddit);
    tracing::info!("  Poll interval: {:?}", config.poll_interval);
    tracing::info!("  Workers: {}", config.workers);
    tracing::info!(
        "  Dispatch: {} attempts, {:?}..{:?} backoff, on exhaustion {:?}",
        config.dispatch_max_attempts,
        config.dispatch_base_delay,
        config.dispatch_max_delay,
        config.on_dispatch_exhausted
    );

    let seen = SeenStore::open(&config.database_url)
        .await
        .with_context(|| format!("Failed to open seen-store at {}", config.database_url))?;
    tracing::info!("Seen-store ready ({} submissions already notified)", seen.len());

    let channel: Arc<dyn NotificationChannel> = match &config.webhook_url {
        Some(url) if !config.dry_run => Arc::new(
            DiscordWebhookChannel::new(url.clone(), config.http_timeout)
                .context("Failed to build webhook client")?,
        ),
        _ => {
            tracing::warn!("Dry run: notifications will be logged, not sent");
            Arc::new(LogChannel)
        }
    };
    let dispatcher = Dispatcher::new(
        channel,
        RetryPolicy::new(
            config.dispatch_max_attempts,
            config.dispatch_base_delay,
            config.dispatch_max_delay,
        ),
    );

    let stats = Arc::new(PipelineStats::new(STATS_LOG_INTERVAL));
    let pipeline = Arc::new(Pipeline::new(
        Arc::new(config.rules.clone()),
        seen.clone(),
        dispatcher,
        config.mention.clone(),
        config.on_dispatch_exhausted,
        stats,
    ));

    let client = RedditClient::new(config.reddit.clone(), config.http_timeout)
        .context("Failed to build Reddit client")?;
    let feed = Arc::new(RedditFeed::new(client, config.subreddit.clone(), config.poll_interval));

    // Graceful shutdown (SIGINT + SIGTERM)
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received SIGINT");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM");
            }
        }
        let _ = shutdown_tx.send(true);
    });

    let reason = Supervisor::new(feed, pipeline, config.supervisor_settings(), shutdown_rx)
        .run()
        .await;

    seen.close().await;

    if !reason.is_clean() {
        tracing::error!("Exiting: {}", reason);
        std::process::exit(1);
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

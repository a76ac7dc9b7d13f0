use anyhow::{bail, Context, Result};
use listing_core::RuleSet;
use reddit_feed::RedditCredentials;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::pipeline::ExhaustedPolicy;
use crate::supervisor::SupervisorSettings;

pub const DEFAULT_DATABASE_URL: &str = "sqlite:wemb.db";

#[derive(Clone)]
pub struct MonitorConfig {
    pub rules_path: PathBuf,
    pub rules: RuleSet,

    // Notifications
    /// `None` only in dry-run mode.
    pub webhook_url: Option<String>,
    pub mention: Option<String>,
    pub dispatch_max_attempts: u32,
    pub dispatch_base_delay: Duration,
    pub dispatch_max_delay: Duration,
    pub on_dispatch_exhausted: ExhaustedPolicy,
    pub http_timeout: Duration,

    // Feed
    pub reddit: RedditCredentials,
    pub subreddit: String,
    pub poll_interval: Duration,

    // Supervisor
    pub workers: usize,
    pub max_connect_failures: u32,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,

    pub database_url: String,
    pub dry_run: bool,
}

impl fmt::Debug for MonitorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The webhook URL embeds its token.
        f.debug_struct("MonitorConfig")
            .field("rules_path", &self.rules_path)
            .field("rules", &self.rules.len())
            .field("webhook_url", &self.webhook_url.as_ref().map(|_| "<redacted>"))
            .field("mention", &self.mention)
            .field("dispatch_max_attempts", &self.dispatch_max_attempts)
            .field("dispatch_base_delay", &self.dispatch_base_delay)
            .field("dispatch_max_delay", &self.dispatch_max_delay)
            .field("on_dispatch_exhausted", &self.on_dispatch_exhausted)
            .field("http_timeout", &self.http_timeout)
            .field("reddit", &self.reddit)
            .field("subreddit", &self.subreddit)
            .field("poll_interval", &self.poll_interval)
            .field("workers", &self.workers)
            .field("max_connect_failures", &self.max_connect_failures)
            .field("reconnect_base_delay", &self.reconnect_base_delay)
            .field("reconnect_max_delay", &self.reconnect_max_delay)
            .field("database_url", &self.database_url)
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

pub fn database_url_from_env() -> String {
    env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string())
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{} has invalid value {:?}: {}", key, raw, e)),
        _ => Ok(default),
    }
}

fn required(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String> {
    lookup(key)
        .filter(|v| !v.trim().is_empty())
        .with_context(|| format!("{} not set", key))
}

impl MonitorConfig {
    pub fn from_env(dry_run: bool) -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok(), dry_run)
    }

    /// Build from any key lookup. Every value is validated here so nothing
    /// downstream sees a half-valid configuration.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>, dry_run: bool) -> Result<Self> {
        let rules_path = PathBuf::from(
            lookup("WEMB_RULES_PATH").unwrap_or_else(|| "rules.json".to_string()),
        );
        let document = std::fs::read_to_string(&rules_path)
            .with_context(|| format!("Failed to read rules file {}", rules_path.display()))?;
        let rules = RuleSet::from_json_str(&document)
            .with_context(|| format!("Invalid rules file {}", rules_path.display()))?;

        let webhook_url = match lookup("WEMB_WEBHOOK_URL").filter(|v| !v.trim().is_empty()) {
            Some(url) => Some(validate_webhook_url(url.trim())?),
            None if dry_run => None,
            None => bail!("WEMB_WEBHOOK_URL not set (use --dry-run to log notifications instead)"),
        };

        let config = Self {
            rules_path,
            rules,

            webhook_url,
            mention: lookup("WEMB_MENTION_STRING").filter(|m| !m.trim().is_empty()),
            dispatch_max_attempts: parse_or(&lookup, "WEMB_DISPATCH_MAX_ATTEMPTS", 4)?,
            dispatch_base_delay: Duration::from_millis(parse_or(
                &lookup,
                "WEMB_DISPATCH_BASE_DELAY_MS",
                500,
            )?),
            dispatch_max_delay: Duration::from_millis(parse_or(
                &lookup,
                "WEMB_DISPATCH_MAX_DELAY_MS",
                30_000,
            )?),
            on_dispatch_exhausted: parse_or(
                &lookup,
                "WEMB_ON_DISPATCH_EXHAUSTED",
                ExhaustedPolicy::MarkSeen,
            )?,
            http_timeout: Duration::from_secs(parse_or(&lookup, "WEMB_HTTP_TIMEOUT_SECS", 10)?),

            reddit: RedditCredentials {
                client_id: required(&lookup, "REDDIT_CLIENT_ID")?,
                client_secret: required(&lookup, "REDDIT_CLIENT_SECRET")?,
                user_agent: required(&lookup, "REDDIT_USER_AGENT")?,
            },
            subreddit: lookup("WEMB_SUBREDDIT")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "watchexchange".to_string()),
            poll_interval: Duration::from_secs(parse_or(&lookup, "WEMB_POLL_INTERVAL_SECS", 15)?),

            workers: parse_or(&lookup, "WEMB_WORKERS", 4)?,
            max_connect_failures: parse_or(&lookup, "WEMB_MAX_CONNECT_FAILURES", 5)?,
            reconnect_base_delay: Duration::from_secs(parse_or(
                &lookup,
                "WEMB_RECONNECT_BASE_SECS",
                10,
            )?),
            reconnect_max_delay: Duration::from_secs(parse_or(
                &lookup,
                "WEMB_RECONNECT_MAX_SECS",
                300,
            )?),

            database_url: lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            dry_run,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            bail!("WEMB_WORKERS must be at least 1");
        }
        if self.max_connect_failures == 0 {
            bail!("WEMB_MAX_CONNECT_FAILURES must be at least 1");
        }
        if self.dispatch_max_attempts == 0 {
            bail!("WEMB_DISPATCH_MAX_ATTEMPTS must be at least 1");
        }
        if self.dispatch_base_delay > self.dispatch_max_delay {
            bail!(
                "WEMB_DISPATCH_BASE_DELAY_MS ({:?}) exceeds WEMB_DISPATCH_MAX_DELAY_MS ({:?})",
                self.dispatch_base_delay,
                self.dispatch_max_delay
            );
        }
        if self.reconnect_base_delay > self.reconnect_max_delay {
            bail!(
                "WEMB_RECONNECT_BASE_SECS ({:?}) exceeds WEMB_RECONNECT_MAX_SECS ({:?})",
                self.reconnect_base_delay,
                self.reconnect_max_delay
            );
        }
        if self.http_timeout.is_zero() {
            bail!("WEMB_HTTP_TIMEOUT_SECS must be positive");
        }
        Ok(())
    }

    pub fn supervisor_settings(&self) -> SupervisorSettings {
        SupervisorSettings {
            max_connect_failures: self.max_connect_failures,
            reconnect_base_delay: self.reconnect_base_delay,
            reconnect_max_delay: self.reconnect_max_delay,
            workers: self.workers,
        }
    }
}

fn validate_webhook_url(raw: &str) -> Result<String> {
    let url = reqwest::Url::parse(raw).context("WEMB_WEBHOOK_URL is not a valid URL")?;
    if url.scheme() != "https" && url.scheme() != "http" {
        bail!("WEMB_WEBHOOK_URL must be http(s), got {}", url.scheme());
    }
    Ok(raw.to_string())
}

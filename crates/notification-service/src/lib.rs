mod message;
mod retry;
mod webhook;

pub use message::NotificationMessage;
pub use retry::RetryPolicy;
pub use webhook::DiscordWebhookChannel;

use async_trait::async_trait;
use std::sync::Arc;

/// Trait for notification channels. One call is one outbound attempt.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn send(&self, message: &NotificationMessage) -> Result<(), NotificationError>;
    fn name(&self) -> &str;
}

/// Errors from the notification system.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result of a dispatch after all retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    Failed(String),
}

impl DispatchOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DispatchOutcome::Delivered)
    }
}

/// Sends messages through one channel, retrying failed calls with backoff.
///
/// Non-2xx responses and transport errors are treated alike. Exhausted retries are
/// reported back as [`DispatchOutcome::Failed`]; deciding what to do with them is the
/// caller's job.
pub struct Dispatcher {
    channel: Arc<dyn NotificationChannel>,
    policy: RetryPolicy,
}

impl Dispatcher {
    pub fn new(channel: Arc<dyn NotificationChannel>, policy: RetryPolicy) -> Self {
        Self { channel, policy }
    }

    pub fn channel_name(&self) -> &str {
        self.channel.name()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn dispatch(&self, message: &NotificationMessage) -> DispatchOutcome {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 0..max_attempts {
            match self.channel.send(message).await {
                Ok(()) => {
                    tracing::debug!(
                        "Sent notification for {} via {} (attempt {})",
                        message.submission_id,
                        self.channel.name(),
                        attempt + 1
                    );
                    return DispatchOutcome::Delivered;
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt + 1 >= max_attempts {
                        break;
                    }
                    let delay = self.policy.delay_for_attempt(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        max = max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Notification for {} via {} failed, retrying",
                        message.submission_id,
                        self.channel.name()
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        tracing::error!(
            "Giving up on notification for {} via {} after {} attempts: {}",
            message.submission_id,
            self.channel.name(),
            max_attempts,
            last_error
        );
        DispatchOutcome::Failed(last_error)
    }
}

/// Dry-run channel: logs the message and reports success without any network call.
pub struct LogChannel;

#[async_trait]
impl NotificationChannel for LogChannel {
    async fn send(&self, message: &NotificationMessage) -> Result<(), NotificationError> {
        tracing::info!(
            "[dry-run] would notify {}: {} ({})",
            message.submission_id,
            message.title,
            message.content()
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use listing_core::SubmissionType;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Fails the first `failures` calls, then succeeds.
    struct FlakyChannel {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl NotificationChannel for FlakyChannel {
        async fn send(&self, _message: &NotificationMessage) -> Result<(), NotificationError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(NotificationError::Status {
                    status: 502,
                    body: "bad gateway".to_string(),
                })
            } else {
                Ok(())
            }
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    fn message() -> NotificationMessage {
        NotificationMessage {
            submission_id: "12abcd".to_string(),
            title: "[WTS] Seiko".to_string(),
            link: "https://www.reddit.com/r/Watchexchange/comments/12abcd/".to_string(),
            submission_type: SubmissionType::Wts,
            transaction_count: Some(9),
            posted_at: Utc::now(),
            mention: None,
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1), Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_retries_until_delivered() {
        let channel = Arc::new(FlakyChannel {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let dispatcher = Dispatcher::new(channel.clone(), fast_policy(4));

        assert_eq!(dispatcher.dispatch(&message()).await, DispatchOutcome::Delivered);
        assert_eq!(channel.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_are_surfaced() {
        let channel = Arc::new(FlakyChannel {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        });
        let dispatcher = Dispatcher::new(channel.clone(), fast_policy(3));

        let outcome = dispatcher.dispatch(&message()).await;
        assert!(matches!(outcome, DispatchOutcome::Failed(ref reason) if reason.contains("502")));
        assert_eq!(channel.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_log_channel_always_delivers() {
        let dispatcher = Dispatcher::new(Arc::new(LogChannel), fast_policy(1));
        assert!(dispatcher.dispatch(&message()).await.is_delivered());
        assert_eq!(dispatcher.channel_name(), "log");
    }
}

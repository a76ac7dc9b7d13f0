use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use listing_core::{matcher, RuleSet, Submission};
use notification_service::{DispatchOutcome, Dispatcher, NotificationMessage};
use seen_store::{SeenOutcome, SeenStore};

use crate::metrics::PipelineStats;

/// What to do with a matched submission once every dispatch retry has failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExhaustedPolicy {
    /// Record it anyway. At-most-once: the notification may be lost, never repeated.
    MarkSeen,
    /// Leave it unrecorded so the next overlapping session tries again.
    /// At-least-once: a later pass may notify twice if the endpoint did get the first call.
    LeaveUnseen,
}

impl FromStr for ExhaustedPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mark-seen" | "mark_seen" => Ok(ExhaustedPolicy::MarkSeen),
            "leave-unseen" | "leave_unseen" => Ok(ExhaustedPolicy::LeaveUnseen),
            other => Err(format!(
                "unknown dispatch-exhausted policy {:?} (expected mark-seen or leave-unseen)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    NotMatched,
    AlreadySeen,
    /// Another worker is handling the same id right now.
    InFlight,
    Delivered,
    FailedMarkedSeen,
    FailedLeftUnseen,
    /// Dispatch finished but the seen record could not be written.
    StoreFailed,
}

/// Matcher → Seen-Store → Dispatcher → Seen-Store, for one submission at a time.
pub struct Pipeline {
    rules: Arc<RuleSet>,
    seen: SeenStore,
    dispatcher: Dispatcher,
    mention: Option<String>,
    on_exhausted: ExhaustedPolicy,
    stats: Arc<PipelineStats>,
}

impl Pipeline {
    pub fn new(
        rules: Arc<RuleSet>,
        seen: SeenStore,
        dispatcher: Dispatcher,
        mention: Option<String>,
        on_exhausted: ExhaustedPolicy,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            rules,
            seen,
            dispatcher,
            mention,
            on_exhausted,
            stats,
        }
    }

    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }

    pub async fn process(&self, submission: Submission) -> ProcessOutcome {
        let outcome = self.evaluate(&submission).await;
        self.stats.record_outcome(&outcome);
        outcome
    }

    async fn evaluate(&self, submission: &Submission) -> ProcessOutcome {
        tracing::info!("Incoming submission ({}): {}", submission.id, submission.title);
        tracing::debug!(
            "  type={} transactions={:?} url={}",
            submission.submission_type,
            submission.author_transaction_count,
            submission.permalink
        );

        let matched = matcher::matching_rules(submission, &self.rules);
        if matched.is_empty() {
            tracing::info!("  Did not match");
            return ProcessOutcome::NotMatched;
        }
        tracing::info!("  Matched rule(s) {:?}", matched);

        // Held until the seen record is written.
        let Some(_claim) = self.seen.try_claim(&submission.id) else {
            tracing::info!("  Already being processed by another worker, skipping");
            return ProcessOutcome::InFlight;
        };

        if self.seen.has(&submission.id) {
            tracing::info!("  Already notified, skipping");
            return ProcessOutcome::AlreadySeen;
        }

        let message = NotificationMessage::from_submission(submission, self.mention.as_deref());
        let (seen_outcome, outcome) = match self.dispatcher.dispatch(&message).await {
            DispatchOutcome::Delivered => {
                tracing::info!("  Notification sent via {}", self.dispatcher.channel_name());
                (SeenOutcome::Delivered, ProcessOutcome::Delivered)
            }
            DispatchOutcome::Failed(reason) => match self.on_exhausted {
                ExhaustedPolicy::MarkSeen => {
                    tracing::error!(
                        "  Notification for {} failed ({}); marking seen, it will not be retried",
                        submission.id,
                        reason
                    );
                    (SeenOutcome::DispatchFailed, ProcessOutcome::FailedMarkedSeen)
                }
                ExhaustedPolicy::LeaveUnseen => {
                    tracing::error!(
                        "  Notification for {} failed ({}); leaving unseen for a later pass",
                        submission.id,
                        reason
                    );
                    return ProcessOutcome::FailedLeftUnseen;
                }
            },
        };

        if let Err(e) = self.seen.record(&submission.id, Utc::now(), seen_outcome).await {
            tracing::error!(
                "  Failed to persist {} in the seen-store: {}; suppressed until restart only",
                submission.id,
                e
            );
            return ProcessOutcome::StoreFailed;
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use listing_core::{Rule, SubmissionType};
    use notification_service::{NotificationChannel, NotificationError, RetryPolicy};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingChannel {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl NotificationChannel for CountingChannel {
        async fn send(&self, _message: &NotificationMessage) -> Result<(), NotificationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(NotificationError::Transport("connection refused".to_string()))
            } else {
                Ok(())
            }
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    fn rules() -> Arc<RuleSet> {
        Arc::new(RuleSet::new(vec![Rule::new(
            SubmissionType::Wts,
            5,
            ["rolex", "submariner"],
            false,
        )]))
    }

    fn submission(id: &str, title: &str, transactions: u32) -> Submission {
        Submission {
            id: id.to_string(),
            submission_type: SubmissionType::from_title(title),
            author_transaction_count: Some(transactions),
            title: title.to_string(),
            body: String::new(),
            created_at: Utc::now(),
            permalink: format!("https://www.reddit.com/r/Watchexchange/comments/{}/", id),
        }
    }

    async fn pipeline(fail: bool, policy: ExhaustedPolicy) -> (Pipeline, Arc<CountingChannel>, SeenStore) {
        let seen = SeenStore::open("sqlite::memory:").await.unwrap();
        let channel = Arc::new(CountingChannel {
            calls: AtomicUsize::new(0),
            fail,
        });
        let dispatcher = Dispatcher::new(
            channel.clone(),
            RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(2)),
        );
        let pipeline = Pipeline::new(
            rules(),
            seen.clone(),
            dispatcher,
            Some("<@&1>".to_string()),
            policy,
            Arc::new(PipelineStats::new(0)),
        );
        (pipeline, channel, seen)
    }

    #[tokio::test]
    async fn test_matched_unseen_is_dispatched_once() {
        let (pipeline, channel, seen) = pipeline(false, ExhaustedPolicy::MarkSeen).await;
        let post = submission("a1", "[WTS] Selling my Rolex Submariner", 10);

        assert_eq!(pipeline.process(post.clone()).await, ProcessOutcome::Delivered);
        assert_eq!(pipeline.process(post).await, ProcessOutcome::AlreadySeen);

        assert_eq!(channel.calls.load(Ordering::SeqCst), 1);
        assert_eq!(seen.get("a1").await.unwrap().unwrap().outcome, SeenOutcome::Delivered);
    }

    #[tokio::test]
    async fn test_already_seen_is_never_dispatched() {
        let (pipeline, channel, seen) = pipeline(false, ExhaustedPolicy::MarkSeen).await;
        seen.record("a1", Utc::now(), SeenOutcome::Delivered).await.unwrap();

        let outcome = pipeline
            .process(submission("a1", "[WTS] Selling my Rolex Submariner", 10))
            .await;

        assert_eq!(outcome, ProcessOutcome::AlreadySeen);
        assert_eq!(channel.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unmatched_is_not_dispatched_or_recorded() {
        let (pipeline, channel, seen) = pipeline(false, ExhaustedPolicy::MarkSeen).await;

        let outcome = pipeline
            .process(submission("b2", "[WTS] Selling my Rolex Submariner", 3))
            .await;

        assert_eq!(outcome, ProcessOutcome::NotMatched);
        assert_eq!(channel.calls.load(Ordering::SeqCst), 0);
        assert!(!seen.has("b2"));
    }

    #[tokio::test]
    async fn test_exhausted_retries_mark_seen() {
        let (pipeline, channel, seen) = pipeline(true, ExhaustedPolicy::MarkSeen).await;
        let post = submission("c3", "[WTS] Rolex Submariner", 10);

        assert_eq!(pipeline.process(post.clone()).await, ProcessOutcome::FailedMarkedSeen);
        assert_eq!(channel.calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            seen.get("c3").await.unwrap().unwrap().outcome,
            SeenOutcome::DispatchFailed
        );

        // Not retried on a later pass.
        assert_eq!(pipeline.process(post).await, ProcessOutcome::AlreadySeen);
        assert_eq!(channel.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_leave_unseen() {
        let (pipeline, channel, seen) = pipeline(true, ExhaustedPolicy::LeaveUnseen).await;
        let post = submission("c3", "[WTS] Rolex Submariner", 10);

        assert_eq!(pipeline.process(post.clone()).await, ProcessOutcome::FailedLeftUnseen);
        assert!(!seen.has("c3"));
        assert!(seen.get("c3").await.unwrap().is_none());

        // A later pass tries again.
        assert_eq!(pipeline.process(post).await, ProcessOutcome::FailedLeftUnseen);
        assert_eq!(channel.calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_store_failure_does_not_renotify() {
        let (pipeline, channel, seen) = pipeline(false, ExhaustedPolicy::MarkSeen).await;
        seen.close().await;
        let post = submission("e5", "[WTS] Rolex Submariner", 10);

        assert_eq!(pipeline.process(post.clone()).await, ProcessOutcome::StoreFailed);
        assert_eq!(pipeline.process(post).await, ProcessOutcome::AlreadySeen);

        assert_eq!(channel.calls.load(Ordering::SeqCst), 1);
        assert_eq!(PipelineStats::get(&pipeline.stats().store_errors), 1);
    }

    #[tokio::test]
    async fn test_concurrent_duplicates_dispatch_once() {
        let (pipeline, channel, _seen) = pipeline(false, ExhaustedPolicy::MarkSeen).await;
        let pipeline = Arc::new(pipeline);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let pipeline = Arc::clone(&pipeline);
            handles.push(tokio::spawn(async move {
                pipeline
                    .process(submission("d4", "[WTS] Rolex Submariner", 10))
                    .await
            }));
        }

        let mut delivered = 0;
        for handle in handles {
            if handle.await.unwrap() == ProcessOutcome::Delivered {
                delivered += 1;
            }
        }

        assert_eq!(delivered, 1);
        assert_eq!(channel.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_parse_exhausted_policy() {
        assert_eq!("mark-seen".parse::<ExhaustedPolicy>(), Ok(ExhaustedPolicy::MarkSeen));
        assert_eq!("LEAVE_UNSEEN".parse::<ExhaustedPolicy>(), Ok(ExhaustedPolicy::LeaveUnseen));
        assert!("retry-forever".parse::<ExhaustedPolicy>().is_err());
    }
}

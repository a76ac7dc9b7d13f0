use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use listing_core::{FeedError, FeedSession, FeedSource, Submission};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;

use crate::pipeline::Pipeline;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorSettings {
    /// Consecutive failed connects before giving up.
    pub max_connect_failures: u32,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
    /// Maximum submissions processed concurrently. Ingestion waits when all are busy.
    pub workers: usize,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            max_connect_failures: 5,
            reconnect_base_delay: Duration::from_secs(10),
            reconnect_max_delay: Duration::from_secs(300),
            workers: 4,
        }
    }
}

impl SupervisorSettings {
    /// `base * 2^n`, capped.
    pub fn reconnect_delay(&self, consecutive: u32) -> Duration {
        let multiplier = 1u32.checked_shl(consecutive).unwrap_or(u32::MAX);
        self.reconnect_base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.reconnect_max_delay)
            .min(self.reconnect_max_delay)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Connecting,
    Streaming,
    Faulted,
    Stopped,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SupervisorState::Connecting => "connecting",
            SupervisorState::Streaming => "streaming",
            SupervisorState::Faulted => "faulted",
            SupervisorState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Why the supervisor reached `Stopped`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    Shutdown,
    ConnectAttemptsExhausted { attempts: u32, last_error: String },
    FatalFeedError(String),
}

impl StopReason {
    /// Only an explicit shutdown is a clean exit.
    pub fn is_clean(&self) -> bool {
        matches!(self, StopReason::Shutdown)
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Shutdown => write!(f, "shutdown requested"),
            StopReason::ConnectAttemptsExhausted { attempts, last_error } => write!(
                f,
                "gave up after {} consecutive connect failures (last: {})",
                attempts, last_error
            ),
            StopReason::FatalFeedError(e) => write!(f, "fatal feed error: {}", e),
        }
    }
}

enum StreamEnd {
    Shutdown,
    Faulted(String),
    Fatal(String),
}

enum StreamEvent {
    Shutdown,
    Item(Result<Option<Submission>, FeedError>),
}

/// Resolves once shutdown has been requested. A dropped sender never resolves.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Drives the feed: `Connecting → Streaming → (Faulted → Connecting)* → Stopped`.
pub struct Supervisor {
    feed: Arc<dyn FeedSource>,
    pipeline: Arc<Pipeline>,
    settings: SupervisorSettings,
    shutdown: watch::Receiver<bool>,
    state: SupervisorState,
    permits: Arc<Semaphore>,
    workers: JoinSet<()>,
}

impl Supervisor {
    pub fn new(
        feed: Arc<dyn FeedSource>,
        pipeline: Arc<Pipeline>,
        settings: SupervisorSettings,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(settings.workers.max(1)));
        Self {
            feed,
            pipeline,
            settings,
            shutdown,
            state: SupervisorState::Connecting,
            permits,
            workers: JoinSet::new(),
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    fn transition(&mut self, next: SupervisorState) {
        if self.state != next {
            tracing::debug!("Supervisor {} -> {}", self.state, next);
            self.state = next;
        }
    }

    /// Sleep for `delay` unless shutdown arrives first. Returns false on shutdown.
    async fn backoff(&mut self, delay: Duration) -> bool {
        tokio::select! {
            biased;
            _ = shutdown_requested(&mut self.shutdown) => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Run until `Stopped`. In-flight submissions are finished before returning.
    pub async fn run(mut self) -> StopReason {
        let mut session: Option<Box<dyn FeedSession>> = None;
        let mut connect_failures = 0u32;
        let mut faults = 0u32;

        tracing::info!("Starting monitor loop on feed '{}'", self.feed.name());

        let reason = loop {
            match self.state {
                SupervisorState::Connecting => {
                    let feed = Arc::clone(&self.feed);
                    let result = tokio::select! {
                        biased;
                        _ = shutdown_requested(&mut self.shutdown) => break StopReason::Shutdown,
                        result = feed.connect() => result,
                    };

                    match result {
                        Ok(opened) => {
                            connect_failures = 0;
                            session = Some(opened);
                            tracing::info!("Started stream!");
                            self.transition(SupervisorState::Streaming);
                        }
                        Err(e) if e.is_fatal() => {
                            break StopReason::FatalFeedError(e.to_string());
                        }
                        Err(e) => {
                            connect_failures += 1;
                            if connect_failures >= self.settings.max_connect_failures {
                                break StopReason::ConnectAttemptsExhausted {
                                    attempts: connect_failures,
                                    last_error: e.to_string(),
                                };
                            }
                            let delay = self.settings.reconnect_delay(connect_failures - 1);
                            tracing::warn!(
                                "Connect attempt {}/{} failed: {}. Retrying in {:?}",
                                connect_failures,
                                self.settings.max_connect_failures,
                                e,
                                delay
                            );
                            if !self.backoff(delay).await {
                                break StopReason::Shutdown;
                            }
                        }
                    }
                }
                SupervisorState::Streaming => {
                    let Some(active) = session.as_mut() else {
                        self.transition(SupervisorState::Connecting);
                        continue;
                    };

                    match self.stream(active.as_mut(), &mut faults).await {
                        StreamEnd::Shutdown => break StopReason::Shutdown,
                        StreamEnd::Fatal(e) => break StopReason::FatalFeedError(e),
                        StreamEnd::Faulted(e) => {
                            tracing::error!("Feed session faulted: {}", e);
                            session = None;
                            self.transition(SupervisorState::Faulted);
                        }
                    }
                }
                SupervisorState::Faulted => {
                    let delay = self.settings.reconnect_delay(faults);
                    faults = faults.saturating_add(1);
                    tracing::info!("Restarting monitor loop in {:?}", delay);
                    if !self.backoff(delay).await {
                        break StopReason::Shutdown;
                    }
                    self.transition(SupervisorState::Connecting);
                }
                SupervisorState::Stopped => break StopReason::Shutdown,
            }
        };

        drop(session);
        self.transition(SupervisorState::Stopped);
        self.drain().await;
        self.pipeline.stats().log_summary();
        tracing::info!("Monitor stopped: {}", reason);
        reason
    }

    async fn stream(&mut self, session: &mut dyn FeedSession, faults: &mut u32) -> StreamEnd {
        loop {
            self.reap_finished();

            let event = tokio::select! {
                biased;
                _ = shutdown_requested(&mut self.shutdown) => StreamEvent::Shutdown,
                item = session.next_submission() => StreamEvent::Item(item),
            };

            match event {
                StreamEvent::Shutdown => return StreamEnd::Shutdown,
                StreamEvent::Item(Ok(Some(submission))) => {
                    *faults = 0;
                    self.pipeline.stats().record_received();
                    if !self.spawn_worker(submission).await {
                        return StreamEnd::Shutdown;
                    }
                }
                StreamEvent::Item(Ok(None)) => {
                    return StreamEnd::Faulted("session terminated by upstream".to_string());
                }
                StreamEvent::Item(Err(e)) if e.is_malformed() => {
                    self.pipeline.stats().record_malformed();
                    tracing::warn!("Skipping submission: {}", e);
                }
                StreamEvent::Item(Err(e)) if e.is_fatal() => return StreamEnd::Fatal(e.to_string()),
                StreamEvent::Item(Err(e)) => return StreamEnd::Faulted(e.to_string()),
            }
        }
    }

    /// Hand one submission to the worker pool, waiting for a free slot.
    /// Returns false if shutdown arrived while waiting.
    async fn spawn_worker(&mut self, submission: Submission) -> bool {
        let permits = Arc::clone(&self.permits);
        let permit = tokio::select! {
            biased;
            _ = shutdown_requested(&mut self.shutdown) => return false,
            permit = permits.acquire_owned() => permit,
        };
        let Ok(permit) = permit else {
            tracing::error!("Worker pool closed unexpectedly");
            return false;
        };

        let pipeline = Arc::clone(&self.pipeline);
        self.workers.spawn(async move {
            let _permit = permit;
            pipeline.process(submission).await;
        });
        true
    }

    fn reap_finished(&mut self) {
        while let Some(result) = self.workers.try_join_next() {
            if let Err(e) = result {
                tracing::error!("Submission worker crashed: {}", e);
            }
        }
    }

    async fn drain(&mut self) {
        if !self.workers.is_empty() {
            tracing::info!("Waiting for {} in-flight submission(s)", self.workers.len());
        }
        while let Some(result) = self.workers.join_next().await {
            if let Err(e) = result {
                tracing::error!("Submission worker crashed: {}", e);
            }
        }
    }
}

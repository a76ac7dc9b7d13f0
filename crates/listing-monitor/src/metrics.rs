use std::sync::atomic::{AtomicU64, Ordering};

use crate::pipeline::ProcessOutcome;

/// Counters for the evaluation-and-dispatch pipeline.
/// Shared between the supervisor and every worker, so all fields are atomics.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub received: AtomicU64,
    pub malformed: AtomicU64,
    pub not_matched: AtomicU64,
    pub duplicates: AtomicU64,
    pub delivered: AtomicU64,
    pub failed_marked_seen: AtomicU64,
    pub failed_left_unseen: AtomicU64,
    pub store_errors: AtomicU64,
    log_interval: u64,
}

impl PipelineStats {
    /// Emits a summary every `log_interval` received submissions (0 disables).
    pub fn new(log_interval: u64) -> Self {
        Self {
            log_interval,
            ..Default::default()
        }
    }

    pub fn record_received(&self) {
        let received = self.received.fetch_add(1, Ordering::Relaxed) + 1;
        if self.log_interval > 0 && received % self.log_interval == 0 {
            self.log_summary();
        }
    }

    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outcome(&self, outcome: &ProcessOutcome) {
        let counter = match outcome {
            ProcessOutcome::NotMatched => &self.not_matched,
            ProcessOutcome::AlreadySeen | ProcessOutcome::InFlight => &self.duplicates,
            ProcessOutcome::Delivered => &self.delivered,
            ProcessOutcome::FailedMarkedSeen => &self.failed_marked_seen,
            ProcessOutcome::FailedLeftUnseen => &self.failed_left_unseen,
            ProcessOutcome::StoreFailed => &self.store_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    /// Emit structured telemetry via tracing
    pub fn log_summary(&self) {
        tracing::info!(
            received = Self::get(&self.received),
            malformed = Self::get(&self.malformed),
            not_matched = Self::get(&self.not_matched),
            duplicates = Self::get(&self.duplicates),
            delivered = Self::get(&self.delivered),
            failed_marked_seen = Self::get(&self.failed_marked_seen),
            failed_left_unseen = Self::get(&self.failed_left_unseen),
            store_errors = Self::get(&self.store_errors),
            "Pipeline summary"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcomes_are_counted() {
        let stats = PipelineStats::new(0);
        stats.record_received();
        stats.record_received();
        stats.record_malformed();
        stats.record_outcome(&ProcessOutcome::Delivered);
        stats.record_outcome(&ProcessOutcome::AlreadySeen);
        stats.record_outcome(&ProcessOutcome::InFlight);
        stats.record_outcome(&ProcessOutcome::FailedLeftUnseen);

        assert_eq!(PipelineStats::get(&stats.received), 2);
        assert_eq!(PipelineStats::get(&stats.malformed), 1);
        assert_eq!(PipelineStats::get(&stats.delivered), 1);
        assert_eq!(PipelineStats::get(&stats.duplicates), 2);
        assert_eq!(PipelineStats::get(&stats.failed_left_unseen), 1);
        assert_eq!(PipelineStats::get(&stats.not_matched), 0);
    }
}

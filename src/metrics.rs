use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use serde::Serialize;

use crate::models::{AiStatus, AllocationMethod};

/// Local tallies mirrored next to the `metrics` facade
#[derive(Debug, Default)]
struct Counts {
    allocations_auto: AtomicU64,
    allocations_manual: AtomicU64,
    allocations_ai: AtomicU64,
    unallocations: AtomicU64,
    unmatched: AtomicU64,
    reallocation_runs: AtomicU64,
    batches_succeeded: AtomicU64,
    batches_failed: AtomicU64,
    batches_empty: AtomicU64,
    messages_processed: AtomicU64,
    messages_errored: AtomicU64,
    events_created: AtomicU64,
    es_entries_created: AtomicU64,
    errors: AtomicU64,
}

/// Point-in-time copy of the local tallies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub allocations_auto: u64,
    pub allocations_manual: u64,
    pub allocations_ai: u64,
    pub unallocations: u64,
    pub unmatched: u64,
    pub reallocation_runs: u64,
    pub batches_succeeded: u64,
    pub batches_failed: u64,
    pub batches_empty: u64,
    pub messages_processed: u64,
    pub messages_errored: u64,
    pub events_created: u64,
    pub es_entries_created: u64,
    pub errors: u64,
}

/// Outcome of one bulk classification run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Nothing to classify, no command was run
    Empty,
    /// Response parsed and applied
    Succeeded,
    /// Invocation or parsing failed, nothing applied
    Failed,
}

impl BatchOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Succeeded => "success",
            Self::Failed => "error",
        }
    }
}

/// Metrics collection and management
///
/// Clones share the same local tallies.
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    // Allocation metrics
    pub allocations_total: &'static str,
    pub unallocations_total: &'static str,
    pub unmatched_total: &'static str,
    pub reallocation_runs_total: &'static str,
    pub reallocation_duration: &'static str,

    // Classifier metrics
    pub classifier_batches_total: &'static str,
    pub classifier_batch_duration: &'static str,
    pub classified_messages_total: &'static str,
    pub completion_duration: &'static str,
    pub events_created_total: &'static str,
    pub es_entries_created_total: &'static str,

    // Error metrics
    pub errors_total: &'static str,

    counts: Arc<Counts>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self {
            allocations_total: "career_inbox_allocations_total",
            unallocations_total: "career_inbox_unallocations_total",
            unmatched_total: "career_inbox_unmatched_total",
            reallocation_runs_total: "career_inbox_reallocation_runs_total",
            reallocation_duration: "career_inbox_reallocation_duration_seconds",

            classifier_batches_total: "career_inbox_classifier_batches_total",
            classifier_batch_duration: "career_inbox_classifier_batch_duration_seconds",
            classified_messages_total: "career_inbox_classified_messages_total",
            completion_duration: "career_inbox_completion_duration_seconds",
            events_created_total: "career_inbox_events_created_total",
            es_entries_created_total: "career_inbox_es_entries_created_total",

            errors_total: "career_inbox_errors_total",

            counts: Arc::default(),
        }
    }
}

impl MetricsCollector {
    /// Register metric descriptions with whatever recorder is installed
    pub fn describe(&self) {
        describe_counter!(self.allocations_total, "Messages assigned to a company, by method");
        describe_counter!(self.unallocations_total, "Allocations cleared by the user");
        describe_counter!(self.unmatched_total, "Automatic allocations where no rule applied");
        describe_counter!(self.reallocation_runs_total, "Full reallocation passes");
        describe_histogram!(self.reallocation_duration, "Duration of a reallocation pass");
        describe_counter!(self.classifier_batches_total, "Bulk classification runs, by outcome");
        describe_histogram!(self.classifier_batch_duration, "Duration of a bulk classification run");
        describe_counter!(self.classified_messages_total, "Messages leaving the unprocessed state, by status");
        describe_histogram!(self.completion_duration, "Latency of the external completion command");
        describe_counter!(self.events_created_total, "Events created from classifier output");
        describe_counter!(self.es_entries_created_total, "Entry-sheet records created from classifier output");
        describe_counter!(self.errors_total, "Errors, by kind and operation");
    }

    /// Record a message being assigned to a company
    pub fn record_allocation(&self, method: AllocationMethod) {
        counter!(self.allocations_total, "method" => method.as_str()).increment(1);
        let slot = match method {
            AllocationMethod::Auto => &self.counts.allocations_auto,
            AllocationMethod::Manual => &self.counts.allocations_manual,
            AllocationMethod::Ai => &self.counts.allocations_ai,
        };
        slot.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unallocation(&self) {
        counter!(self.unallocations_total).increment(1);
        self.counts.unallocations.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an automatic allocation attempt that found no rule
    pub fn record_unmatched(&self) {
        counter!(self.unmatched_total).increment(1);
        self.counts.unmatched.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed reallocation pass
    pub fn record_reallocation(&self, duration: Duration) {
        counter!(self.reallocation_runs_total).increment(1);
        histogram!(self.reallocation_duration).record(duration.as_secs_f64());
        self.counts.reallocation_runs.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the end of a bulk classification run
    pub fn record_batch(&self, outcome: BatchOutcome, duration: Duration) {
        counter!(self.classifier_batches_total, "outcome" => outcome.as_str()).increment(1);
        histogram!(self.classifier_batch_duration).record(duration.as_secs_f64());
        let slot = match outcome {
            BatchOutcome::Empty => &self.counts.batches_empty,
            BatchOutcome::Succeeded => &self.counts.batches_succeeded,
            BatchOutcome::Failed => &self.counts.batches_failed,
        };
        slot.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one message reaching a terminal classification state
    pub fn record_classified(&self, status: AiStatus) {
        let (label, slot) = match status {
            AiStatus::Processed => ("processed", &self.counts.messages_processed),
            AiStatus::Error => ("error", &self.counts.messages_errored),
            AiStatus::Unprocessed => return,
        };
        counter!(self.classified_messages_total, "status" => label).increment(1);
        slot.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completion(&self, duration: Duration, success: bool) {
        histogram!(
            self.completion_duration,
            "status" => if success { "success" } else { "error" }
        )
        .record(duration.as_secs_f64());
    }

    pub fn record_event_created(&self) {
        counter!(self.events_created_total).increment(1);
        self.counts.events_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_es_entry_created(&self) {
        counter!(self.es_entries_created_total).increment(1);
        self.counts.es_entries_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Record error metrics
    pub fn record_error(&self, kind: &'static str, operation: &'static str) {
        counter!(self.errors_total, "kind" => kind, "operation" => operation).increment(1);
        self.counts.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the local tallies
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let c = &self.counts;
        let load = |v: &AtomicU64| v.load(Ordering::Relaxed);
        MetricsSnapshot {
            allocations_auto: load(&c.allocations_auto),
            allocations_manual: load(&c.allocations_manual),
            allocations_ai: load(&c.allocations_ai),
            unallocations: load(&c.unallocations),
            unmatched: load(&c.unmatched),
            reallocation_runs: load(&c.reallocation_runs),
            batches_succeeded: load(&c.batches_succeeded),
            batches_failed: load(&c.batches_failed),
            batches_empty: load(&c.batches_empty),
            messages_processed: load(&c.messages_processed),
            messages_errored: load(&c.messages_errored),
            events_created: load(&c.events_created),
            es_entries_created: load(&c.es_entries_created),
            errors: load(&c.errors),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collector_creation() {
        let collector = MetricsCollector::default();
        assert_eq!(collector.allocations_total, "career_inbox_allocations_total");
        assert_eq!(collector.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_clones_share_tallies() {
        let collector = MetricsCollector::default();
        let clone = collector.clone();
        clone.record_allocation(AllocationMethod::Manual);
        collector.record_classified(AiStatus::Unprocessed);
        assert_eq!(collector.snapshot().allocations_manual, 1);
        assert_eq!(collector.snapshot().messages_processed, 0);
    }
}

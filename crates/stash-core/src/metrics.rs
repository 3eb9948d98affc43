//! Save observability.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::models::DocumentId;

/// Terminal outcome of one save attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveOutcome {
    Committed,
    Queued,
    Conflict,
    TransportError,
    Failed,
}

impl SaveOutcome {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Committed => "committed",
            Self::Queued => "queued",
            Self::Conflict => "conflict",
            Self::TransportError => "transport_error",
            Self::Failed => "failed",
        }
    }
}

/// One recorded save attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SaveMetric {
    pub document_id: DocumentId,
    pub duration: Duration,
    pub payload_bytes: usize,
    /// Attempts made before this one
    pub retry_count: u32,
    pub online: bool,
    pub outcome: SaveOutcome,
}

/// Side-effect collaborator receiving every save attempt
pub trait MetricsSink: Send + Sync {
    fn record(&self, metric: &SaveMetric);
}

/// Emits each attempt as a structured tracing event
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn record(&self, metric: &SaveMetric) {
        tracing::debug!(
            target: "stash::metrics",
            document_id = %metric.document_id,
            duration_ms = u64::try_from(metric.duration.as_millis()).unwrap_or(u64::MAX),
            payload_bytes = metric.payload_bytes,
            retry_count = metric.retry_count,
            online = metric.online,
            outcome = metric.outcome.label(),
            "save attempt"
        );
    }
}

/// Counting sink with a serializable snapshot
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    attempts: AtomicU64,
    committed: AtomicU64,
    queued: AtomicU64,
    conflicts: AtomicU64,
    transport_errors: AtomicU64,
    failed: AtomicU64,
    payload_bytes: AtomicU64,
    total_duration_ms: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub attempts: u64,
    pub committed: u64,
    pub queued: u64,
    pub conflicts: u64,
    pub transport_errors: u64,
    pub failed: u64,
    pub payload_bytes: u64,
    pub total_duration_ms: u64,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            payload_bytes: self.payload_bytes.load(Ordering::Relaxed),
            total_duration_ms: self.total_duration_ms.load(Ordering::Relaxed),
        }
    }
}

impl MetricsSink for MetricsRecorder {
    fn record(&self, metric: &SaveMetric) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        let counter = match metric.outcome {
            SaveOutcome::Committed => &self.committed,
            SaveOutcome::Queued => &self.queued,
            SaveOutcome::Conflict => &self.conflicts,
            SaveOutcome::TransportError => &self.transport_errors,
            SaveOutcome::Failed => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.payload_bytes.fetch_add(
            u64::try_from(metric.payload_bytes).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
        self.total_duration_ms.fetch_add(
            u64::try_from(metric.duration.as_millis()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
    }
}

/// Forwards every metric to several sinks
pub struct FanoutMetricsSink(pub Vec<std::sync::Arc<dyn MetricsSink>>);

impl MetricsSink for FanoutMetricsSink {
    fn record(&self, metric: &SaveMetric) {
        for sink in &self.0 {
            sink.record(metric);
        }
    }
}

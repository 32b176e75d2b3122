use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};

use crate::keyspace::Partition;

/// Lifecycle notifications emitted while a scan runs.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    ScanStarted {
        fingerprint: String,
        partitions: usize,
        page_size: u32,
    },
    PartitionStarted {
        partition: Partition,
    },
    PageFetched {
        partition_id: usize,
        page_records: usize,
        partition_records: usize,
    },
    RetryScheduled {
        partition_id: usize,
        attempt: u32,
        start_key: i64,
        delay: Duration,
        error: String,
    },
    PartitionExhausted {
        partition_id: usize,
        records: usize,
        pages: usize,
    },
    PartitionFailed {
        partition_id: usize,
        error: String,
    },
    PartitionCancelled {
        partition_id: usize,
    },
    ScanCompleted {
        records: usize,
        failed_partitions: usize,
    },
}

impl ScanEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ScanEvent::ScanStarted { .. } => "scan_started",
            ScanEvent::PartitionStarted { .. } => "partition_started",
            ScanEvent::PageFetched { .. } => "page_fetched",
            ScanEvent::RetryScheduled { .. } => "retry_scheduled",
            ScanEvent::PartitionExhausted { .. } => "partition_exhausted",
            ScanEvent::PartitionFailed { .. } => "partition_failed",
            ScanEvent::PartitionCancelled { .. } => "partition_cancelled",
            ScanEvent::ScanCompleted { .. } => "scan_completed",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ScanEvent::PartitionFailed { .. })
    }

    /// Event payload for structured log lines.
    pub fn details(&self) -> Value {
        match self {
            ScanEvent::ScanStarted {
                fingerprint,
                partitions,
                page_size,
            } => json!({
                "fingerprint": fingerprint,
                "partitions": partitions,
                "page_size": page_size,
            }),
            ScanEvent::PartitionStarted { partition } => json!({
                "partition_id": partition.partition_id,
                "start_key": partition.start,
                "end_key": partition.end,
            }),
            ScanEvent::PageFetched {
                partition_id,
                page_records,
                partition_records,
            } => json!({
                "partition_id": partition_id,
                "page_records": page_records,
                "partition_records": partition_records,
            }),
            ScanEvent::RetryScheduled {
                partition_id,
                attempt,
                start_key,
                delay,
                error,
            } => json!({
                "partition_id": partition_id,
                "attempt": attempt,
                "start_key": start_key,
                "delay_ms": delay.as_millis() as u64,
                "error": error,
            }),
            ScanEvent::PartitionExhausted {
                partition_id,
                records,
                pages,
            } => json!({
                "partition_id": partition_id,
                "records": records,
                "pages": pages,
            }),
            ScanEvent::PartitionFailed {
                partition_id,
                error,
            } => json!({
                "partition_id": partition_id,
                "error": error,
            }),
            ScanEvent::PartitionCancelled { partition_id } => json!({
                "partition_id": partition_id,
            }),
            ScanEvent::ScanCompleted {
                records,
                failed_partitions,
            } => json!({
                "records": records,
                "failed_partitions": failed_partitions,
            }),
        }
    }
}

/// Receives scan events. Called concurrently from every partition worker.
pub trait ProgressReporter: Send + Sync {
    fn on_event(&self, event: &ScanEvent);
}

impl<T: ProgressReporter + ?Sized> ProgressReporter for Arc<T> {
    fn on_event(&self, event: &ScanEvent) {
        (**self).on_event(event);
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn on_event(&self, _event: &ScanEvent) {}
}

/// Keeps every event in arrival order.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: Mutex<Vec<ScanEvent>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ScanEvent> {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl ProgressReporter for CollectingReporter {
    fn on_event(&self, event: &ScanEvent) {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(event.clone());
    }
}

/// Forwards each event to several reporters.
pub struct FanoutReporter {
    reporters: Vec<Box<dyn ProgressReporter>>,
}

impl FanoutReporter {
    pub fn new(reporters: Vec<Box<dyn ProgressReporter>>) -> Self {
        Self { reporters }
    }
}

impl ProgressReporter for FanoutReporter {
    fn on_event(&self, event: &ScanEvent) {
        for reporter in &self.reporters {
            reporter.on_event(event);
        }
    }
}

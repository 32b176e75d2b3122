//! Terminal-facing scan reporters: an indicatif partition bar and
//! structured JSON lines on stderr.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use keyscan_core::progress::FanoutReporter;
use keyscan_core::{ProgressReporter, ScanEvent};
use serde_json::{json, Value};

use crate::args::ScanArgs;

/// One structured log line for `event`.
pub fn event_line(component: &str, event: &ScanEvent) -> Value {
    let mut line = json!({
        "component": component,
        "event": event.name(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "details": event.details(),
    });
    if event.is_error() {
        line["level"] = json!("error");
    }
    line
}

pub struct JsonLineReporter {
    component: &'static str,
}

impl JsonLineReporter {
    pub fn new(component: &'static str) -> Self {
        Self { component }
    }
}

impl ProgressReporter for JsonLineReporter {
    fn on_event(&self, event: &ScanEvent) {
        eprintln!("{}", event_line(self.component, event));
    }
}

/// Partition progress bar with a running record count.
pub struct ProgressBarReporter {
    bar: ProgressBar,
    records: AtomicUsize,
    retries: AtomicUsize,
}

impl ProgressBarReporter {
    pub fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} partitions ({msg})",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        Self {
            bar,
            records: AtomicUsize::new(0),
            retries: AtomicUsize::new(0),
        }
    }

    fn refresh(&self) {
        self.bar.set_message(format!(
            "{} records, {} retries",
            self.records.load(Ordering::Relaxed),
            self.retries.load(Ordering::Relaxed)
        ));
    }

    pub fn finish(&self) {
        if !self.bar.is_finished() {
            self.bar.abandon();
        }
    }
}

impl Default for ProgressBarReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for ProgressBarReporter {
    fn on_event(&self, event: &ScanEvent) {
        match event {
            ScanEvent::ScanStarted { partitions, .. } => {
                self.bar.set_length(*partitions as u64);
                self.refresh();
            }
            ScanEvent::PageFetched { page_records, .. } => {
                self.records.fetch_add(*page_records, Ordering::Relaxed);
                self.refresh();
            }
            ScanEvent::RetryScheduled { .. } => {
                self.retries.fetch_add(1, Ordering::Relaxed);
                self.refresh();
            }
            ScanEvent::PartitionExhausted { .. }
            | ScanEvent::PartitionFailed { .. }
            | ScanEvent::PartitionCancelled { .. } => self.bar.inc(1),
            ScanEvent::ScanCompleted { records, .. } => {
                self.bar.finish_with_message(format!("{records} records"));
            }
            ScanEvent::PartitionStarted { .. } => {}
        }
    }
}

/// Reporter selected by the shared scan flags.
pub struct CliReporter {
    progress: Option<Arc<ProgressBarReporter>>,
    fanout: FanoutReporter,
}

impl CliReporter {
    pub fn new(component: &'static str, args: &ScanArgs) -> Self {
        let mut reporters: Vec<Box<dyn ProgressReporter>> = Vec::new();
        let progress = (!args.no_progress).then(|| Arc::new(ProgressBarReporter::new()));
        if let Some(progress) = &progress {
            reporters.push(Box::new(Arc::clone(progress)));
        }
        if args.json_events {
            reporters.push(Box::new(JsonLineReporter::new(component)));
        }
        Self {
            progress,
            fanout: FanoutReporter::new(reporters),
        }
    }

    /// Leaves the bar on screen even when the scan aborted.
    pub fn finish(&self) {
        if let Some(progress) = &self.progress {
            progress.finish();
        }
    }
}

impl ProgressReporter for CliReporter {
    fn on_event(&self, event: &ScanEvent) {
        self.fanout.on_event(event);
    }
}

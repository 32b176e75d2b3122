//! Fan-out/fan-in over key-space partitions.
//!
//! One rayon worker per partition walks its window; the coordinator joins
//! them all before deciding the outcome. Order within a partition is kept,
//! and partitions are concatenated in plan order.

use std::sync::{Arc, Mutex, PoisonError};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::backoff::{BackoffPolicy, Sleeper, ThreadSleeper};
use crate::cancel::CancellationToken;
use crate::contract::{
    scan_fingerprint, validate_page_size, NormalizedScanRequest, ScanFilter, DEFAULT_PAGE_SIZE,
    DEFAULT_PARTITIONS,
};
use crate::error::ScanError;
use crate::fetcher::{PageFetcher, RetryContext};
use crate::keyspace::{compute_partition_plan, KeySpace, Partition};
use crate::progress::{NoopReporter, ProgressReporter, ScanEvent};
use crate::record::Record;
use crate::walker::{WindowOutput, WindowWalker};

/// What to do with finished partitions when another partition fails.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Abort with the first fatal error; completed work is discarded.
    #[default]
    FailFast,
    /// Return records from every exhausted partition plus the failures.
    BestEffort,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanConfig {
    pub key_space: KeySpace,
    pub partitions: usize,
    pub page_size: u32,
    pub backoff: BackoffPolicy,
    /// Under `FailFast`, stop sibling walkers once one partition has failed.
    pub cancel_on_failure: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            key_space: KeySpace::full(),
            partitions: DEFAULT_PARTITIONS,
            page_size: DEFAULT_PAGE_SIZE,
            backoff: BackoffPolicy::default(),
            cancel_on_failure: true,
        }
    }
}

impl ScanConfig {
    pub fn from_request(request: &NormalizedScanRequest) -> Self {
        Self {
            key_space: request.key_space,
            partitions: request.partitions,
            page_size: request.page_size,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionSummary {
    pub partition: Partition,
    pub records: usize,
    pub pages: usize,
}

#[derive(Debug)]
pub struct PartitionFailure {
    pub partition: Partition,
    pub error: ScanError,
}

/// Aggregated records of a scan, handed to exactly one consumer.
#[derive(Debug, Default)]
pub struct ScanResult {
    records: Vec<Record>,
    partitions: Vec<PartitionSummary>,
    failures: Vec<PartitionFailure>,
}

impl ScanResult {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// `false` only for a best-effort scan that lost partitions.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn partitions(&self) -> &[PartitionSummary] {
        &self.partitions
    }

    pub fn failures(&self) -> &[PartitionFailure] {
        &self.failures
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}

pub struct ParallelScanCoordinator {
    config: ScanConfig,
    sleeper: Arc<dyn Sleeper>,
    reporter: Arc<dyn ProgressReporter>,
}

impl ParallelScanCoordinator {
    pub fn new(config: ScanConfig) -> Self {
        Self {
            config,
            sleeper: Arc::new(ThreadSleeper),
            reporter: Arc::new(NoopReporter),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Fail-fast scan: every partition must be exhausted, otherwise the
    /// first partition failure is returned and all records are dropped.
    pub fn scan(
        &self,
        fetcher: &dyn PageFetcher,
        filter: &ScanFilter,
    ) -> Result<ScanResult, ScanError> {
        self.scan_with_policy(fetcher, filter, FailurePolicy::FailFast)
    }

    /// Best-effort scan: partition failures are reported in the result
    /// instead of aborting it.
    pub fn scan_partial(
        &self,
        fetcher: &dyn PageFetcher,
        filter: &ScanFilter,
    ) -> Result<ScanResult, ScanError> {
        self.scan_with_policy(fetcher, filter, FailurePolicy::BestEffort)
    }

    pub fn scan_with_policy(
        &self,
        fetcher: &dyn PageFetcher,
        filter: &ScanFilter,
        policy: FailurePolicy,
    ) -> Result<ScanResult, ScanError> {
        let page_size = validate_page_size(self.config.page_size)?;
        let plan = compute_partition_plan(&self.config.key_space, self.config.partitions)?;

        let fingerprint = scan_fingerprint(&NormalizedScanRequest {
            filter: filter.clone(),
            partitions: plan.len(),
            page_size,
            key_space: self.config.key_space,
        });
        log::info!(
            "Starting parallel scan with {} partitions (fingerprint {})",
            plan.len(),
            fingerprint
        );
        self.reporter.on_event(&ScanEvent::ScanStarted {
            fingerprint,
            partitions: plan.len(),
            page_size,
        });

        let cancel_siblings = policy == FailurePolicy::FailFast && self.config.cancel_on_failure;
        let cancellation = CancellationToken::new();
        let first_failure: Mutex<Option<usize>> = Mutex::new(None);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(plan.len())
            .thread_name(|index| format!("keyscan-partition-{index}"))
            .build()?;

        let outcomes: Vec<Result<WindowOutput, PartitionFailure>> = pool.install(|| {
            plan.par_iter()
                .with_max_len(1)
                .map(|partition| {
                    let outcome = self.walk_partition(
                        fetcher,
                        filter,
                        *partition,
                        page_size,
                        &cancellation,
                    );
                    if let Err(failure) = &outcome {
                        if !failure.error.is_cancelled() {
                            first_failure
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .get_or_insert(partition.partition_id);
                            if cancel_siblings {
                                cancellation.cancel();
                            }
                        }
                    }
                    outcome
                })
                .collect()
        });

        let first_failure = first_failure
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        let result = aggregate(outcomes, policy, first_failure);

        match &result {
            Ok(scan) => self.reporter.on_event(&ScanEvent::ScanCompleted {
                records: scan.len(),
                failed_partitions: scan.failures.len(),
            }),
            Err(error) => log::error!("Scan aborted: {error}"),
        }
        result
    }

    fn walk_partition(
        &self,
        fetcher: &dyn PageFetcher,
        filter: &ScanFilter,
        partition: Partition,
        page_size: u32,
        cancellation: &CancellationToken,
    ) -> Result<WindowOutput, PartitionFailure> {
        self.reporter.on_event(&ScanEvent::PartitionStarted { partition });

        let ctx = RetryContext {
            policy: &self.config.backoff,
            sleeper: self.sleeper.as_ref(),
            cancellation,
            reporter: self.reporter.as_ref(),
            partition_id: partition.partition_id,
        };
        let mut walker = WindowWalker::new(partition, filter, page_size, ctx);

        match walker.walk(fetcher) {
            Ok(output) => {
                log::debug!(
                    "Partition {} exhausted with {} records in {} pages",
                    partition.partition_id,
                    output.records.len(),
                    output.pages
                );
                self.reporter.on_event(&ScanEvent::PartitionExhausted {
                    partition_id: partition.partition_id,
                    records: output.records.len(),
                    pages: output.pages,
                });
                Ok(output)
            }
            Err(error) if error.is_cancelled() => {
                self.reporter.on_event(&ScanEvent::PartitionCancelled {
                    partition_id: partition.partition_id,
                });
                Err(PartitionFailure { partition, error })
            }
            Err(error) => {
                log::error!(
                    "Partition {} [{}, {}] failed: {}",
                    partition.partition_id,
                    partition.start,
                    partition.end,
                    error
                );
                self.reporter.on_event(&ScanEvent::PartitionFailed {
                    partition_id: partition.partition_id,
                    error: error.to_string(),
                });
                Err(PartitionFailure { partition, error })
            }
        }
    }
}

fn aggregate(
    outcomes: Vec<Result<WindowOutput, PartitionFailure>>,
    policy: FailurePolicy,
    first_failure: Option<usize>,
) -> Result<ScanResult, ScanError> {
    let mut result = ScanResult::default();

    for outcome in outcomes {
        match outcome {
            Ok(output) => {
                result.partitions.push(PartitionSummary {
                    partition: output.partition,
                    records: output.records.len(),
                    pages: output.pages,
                });
                result.records.extend(output.records);
            }
            Err(failure) => result.failures.push(failure),
        }
    }

    if policy == FailurePolicy::BestEffort || result.failures.is_empty() {
        return Ok(result);
    }

    let position = first_failure
        .and_then(|partition_id| {
            result
                .failures
                .iter()
                .position(|failure| failure.partition.partition_id == partition_id)
        })
        .unwrap_or(0);
    let failure = result.failures.swap_remove(position);
    Err(ScanError::PartitionFailure {
        partition: failure.partition,
        source: Box::new(failure.error),
    })
}

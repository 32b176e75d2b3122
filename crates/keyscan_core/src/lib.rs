//! Partitioned, concurrent, resumable key-range scanning.
//!
//! A remote collection addressed by a 64-bit key space is split into
//! disjoint windows, each window is walked to exhaustion with a moving
//! cursor, and every page request is guarded by bounded exponential backoff.
//! The aggregated records are handed to a downstream consumer such as the
//! grouping pass in [`consolidation`].
//!
//! # Quick Start
//!
//! ```no_run
//! use keyscan_core::{ParallelScanCoordinator, PageFetcher, ScanConfig, ScanFilter};
//!
//! fn count_admins(fetcher: &dyn PageFetcher) -> Result<usize, keyscan_core::ScanError> {
//!     let coordinator = ParallelScanCoordinator::new(ScanConfig::default());
//!     let result = coordinator.scan(fetcher, &ScanFilter::role("ROLE_EXT_ADMIN"))?;
//!     Ok(result.len())
//! }
//! ```
//!
//! # Architecture
//!
//! - [`keyspace`]: key space and the partition plan
//! - [`backoff`]: retry budget, delay curve and the sleep seam
//! - [`fetcher`]: the "fetch one page" seam and its retry loop
//! - [`walker`]: per-window cursor state machine
//! - [`coordinator`]: rayon fan-out/fan-in with fail-fast aggregation
//! - [`consolidation`]: group-by-foreign-key consumer
//!
//! HTTP transport lives in `keyscan_http`; this crate performs no I/O
//! besides sleeping.

pub mod backoff;
pub mod cancel;
pub mod consolidation;
pub mod contract;
pub mod coordinator;
pub mod error;
pub mod fetcher;
pub mod keyspace;
pub mod progress;
pub mod record;
pub mod walker;

pub use backoff::{BackoffPolicy, RecordingSleeper, Sleeper, ThreadSleeper};
pub use cancel::CancellationToken;
pub use consolidation::{
    group_records, plan_group, ConsolidationConfig, ConsolidationPlan, ConsolidationReport,
    Consolidator, GroupMutator, RecordGroups,
};
pub use contract::{normalize_request, scan_fingerprint, ScanFilter, ScanRequest, ScanSelector};
pub use coordinator::{FailurePolicy, ParallelScanCoordinator, ScanConfig, ScanResult};
pub use error::{FetchError, ScanError};
pub use fetcher::{PageFetcher, PageRequest};
pub use keyspace::{compute_partition_plan, KeySpace, Partition};
pub use progress::{ProgressReporter, ScanEvent};
pub use record::{Cursor, Page, Record};

//! Bounded exponential backoff with symmetric jitter.

use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::cancel::CancellationToken;

pub const DEFAULT_BASE_DELAY_MS: u64 = 100;
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
pub const DEFAULT_MAX_RETRIES: u32 = 10;
/// Jitter spreads each delay over `delay ± 10%`.
pub const JITTER_RATIO: f64 = 0.1;

/// Retry budget and delay curve shared by every remote call of a scan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl BackoffPolicy {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Fresh state for one logical request.
    pub fn start(&self) -> RetryState {
        RetryState {
            attempt_count: 0,
            max_retries: self.max_retries,
            base_delay_ms: self.base_delay_ms,
            max_delay_ms: self.max_delay_ms,
        }
    }
}

/// Per-request retry bookkeeping. Dropped on success or exhaustion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    attempt_count: u32,
    max_retries: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
}

impl RetryState {
    /// Failed attempts recorded so far.
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn record_failure(&mut self) {
        self.attempt_count = self.attempt_count.saturating_add(1);
    }

    pub fn should_retry(&self) -> bool {
        self.attempt_count <= self.max_retries
    }

    /// Delay before the retry that follows the latest recorded failure.
    pub fn next_delay(&self, jitter: f64) -> Duration {
        compute_delay(
            self.base_delay_ms,
            self.max_delay_ms,
            self.attempt_count,
            jitter,
        )
    }
}

/// `min(base * 2^(attempt-1), max)` scaled by `1 + JITTER_RATIO * jitter`,
/// with `jitter` clamped to `[-1, 1]`.
pub fn compute_delay(base_delay_ms: u64, max_delay_ms: u64, attempt: u32, jitter: f64) -> Duration {
    let exponent = attempt.saturating_sub(1).min(63);
    let raw_ms = base_delay_ms.saturating_mul(1u64 << exponent);
    let capped_ms = raw_ms.min(max_delay_ms) as f64;
    let jitter = if jitter.is_finite() {
        jitter.clamp(-1.0, 1.0)
    } else {
        0.0
    };
    let jittered_ms = capped_ms + capped_ms * JITTER_RATIO * jitter;
    Duration::from_micros((jittered_ms.max(0.0) * 1_000.0).round() as u64)
}

/// Symmetric jitter factor in `(-1, 1]` derived from the sub-second part of
/// the wall clock, so walkers that fail together drift apart.
pub fn time_jitter() -> f64 {
    let fraction = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| f64::from(elapsed.subsec_nanos()) / 1_000_000_000.0)
        .unwrap_or(0.5);
    2.0 * (0.5 - fraction)
}

/// Suspends the calling walker between retries.
pub trait Sleeper: Send + Sync {
    /// Returns `false` if the sleep was interrupted by cancellation.
    fn sleep(&self, duration: Duration, cancellation: &CancellationToken) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration, cancellation: &CancellationToken) -> bool {
        cancellation.sleep(duration)
    }
}

/// Records requested delays without blocking.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration, cancellation: &CancellationToken) -> bool {
        self.delays
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(duration);
        !cancellation.is_cancelled()
    }
}

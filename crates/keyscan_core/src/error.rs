use thiserror::Error;

use crate::contract::ValidationError;
use crate::keyspace::Partition;

/// A single failed remote call, classified by how the caller should react.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("client error {status}: {message}")]
    Client { status: u16, message: String },
    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed response body: {0}")]
    Decode(String),
    #[error("unexpected status {status}: {message}")]
    Unexpected { status: u16, message: String },
}

impl FetchError {
    /// Classifies a non-success HTTP status code.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            400..=499 => FetchError::Client { status, message },
            500..=599 => FetchError::Server { status, message },
            _ => FetchError::Unexpected { status, message },
        }
    }

    /// Server-side and wire-level failures are worth repeating; anything the
    /// caller got wrong is not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Server { .. } | FetchError::Transport(_) | FetchError::Decode(_)
        )
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Client { status, .. }
            | FetchError::Server { status, .. }
            | FetchError::Unexpected { status, .. } => Some(*status),
            FetchError::Transport(_) | FetchError::Decode(_) => None,
        }
    }
}

/// Terminal failure of a window walk or of a whole scan.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("non-retryable fetch failure: {0}")]
    Client(#[source] FetchError),
    #[error("exceeded maximum retries ({max_retries}) after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        attempts: u32,
        max_retries: u32,
        #[source]
        last_error: FetchError,
    },
    #[error("invalid page for partition {partition_id}: {reason}")]
    InvalidPage { partition_id: usize, reason: String },
    #[error("scan cancelled")]
    Cancelled,
    #[error(
        "partition {} [{}, {}] failed: {source}",
        .partition.partition_id,
        .partition.start,
        .partition.end
    )]
    PartitionFailure {
        partition: Partition,
        #[source]
        source: Box<ScanError>,
    },
    #[error("failed to build partition worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl ScanError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ScanError::Cancelled)
    }

    /// The partition-level cause when this is a Coordinator-level failure.
    pub fn root_cause(&self) -> &ScanError {
        match self {
            ScanError::PartitionFailure { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

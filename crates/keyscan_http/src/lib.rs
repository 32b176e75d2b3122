//! HTTP transport for key-range scans against the account service.
//!
//! Implements the `PageFetcher` and `GroupMutator` seams of `keyscan_core`
//! with a blocking `reqwest` client and static credential headers.

pub mod auth;
pub mod client;

pub use auth::AuthHeaders;
pub use client::{
    build_scan_url, AccountServiceClient, ClientError, ScanResource, DEFAULT_TIMEOUT,
};

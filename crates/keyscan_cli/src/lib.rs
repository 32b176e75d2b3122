//! Shared plumbing for the `scan-accounts` and `consolidate-licenses`
//! binaries: connection flags, logging, progress rendering and export.

pub mod args;
pub mod export;
pub mod logging;
pub mod reporting;

pub use args::{ConnectionArgs, ScanArgs};
pub use export::{export_to_csv, export_to_json};
pub use logging::init_logging;
pub use reporting::CliReporter;

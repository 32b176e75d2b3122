//! Record export for scan results.

mod csv;
mod json;

use std::fs::File;
use std::io::Write;
use std::path::Path;

use anyhow::Context;
use keyscan_core::Record;

pub use self::csv::{csv_cell, csv_header};

/// Export records to a CSV file.
///
/// The header is the sorted union of every field name; missing fields are
/// written as empty cells.
pub fn export_to_csv(records: &[Record], path: impl AsRef<Path>) -> anyhow::Result<()> {
    let path = path.as_ref();
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    csv::export_to_csv_impl(records, file)
        .with_context(|| format!("failed to write CSV to {}", path.display()))
}

/// Pretty-printed JSON array of records.
pub fn export_to_json(records: &[Record], writer: impl Write) -> anyhow::Result<()> {
    json::export_to_json_impl(records, writer).context("failed to write JSON results")
}

use std::collections::BTreeSet;
use std::io::Write;

use keyscan_core::Record;
use serde_json::Value;

pub fn csv_header(records: &[Record]) -> Vec<String> {
    let names: BTreeSet<&str> = records.iter().flat_map(Record::field_names).collect();
    names.into_iter().map(str::to_string).collect()
}

/// Strings are written raw, `null` as empty, everything else as compact JSON.
pub fn csv_cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

pub(crate) fn export_to_csv_impl(records: &[Record], writer: impl Write) -> anyhow::Result<()> {
    let header = csv_header(records);
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(&header)?;

    for record in records {
        let row = header.iter().map(|field| {
            if field == "key" {
                record.key.to_string()
            } else {
                csv_cell(record.get(field))
            }
        });
        wtr.write_record(row)?;
    }

    wtr.flush()?;
    Ok(())
}

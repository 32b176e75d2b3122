use std::io::Write;

use keyscan_core::Record;

pub(crate) fn export_to_json_impl(
    records: &[Record],
    mut writer: impl Write,
) -> anyhow::Result<()> {
    serde_json::to_writer_pretty(&mut writer, records)?;
    writeln!(writer)?;
    Ok(())
}

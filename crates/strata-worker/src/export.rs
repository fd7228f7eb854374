use strata_core::Row;

/// Render a result set as CSV bytes, header row first.
///
/// NULL cells become empty fields; everything else uses its canonical
/// string form, so re-importing the file preserves values textually.
pub fn render_csv(columns: &[String], rows: &[Row]) -> anyhow::Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(columns)?;
    for row in rows {
        writer.write_record(row.iter().map(cell_text))?;
    }
    Ok(writer.into_inner().map_err(|e| e.into_error())?)
}

/// Display form of a result cell, shared by CSV export and inline tables.
pub fn cell_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

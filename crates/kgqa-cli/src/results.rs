//! Appending test-run results to a CSV file.

use std::fs::OpenOptions;
use std::path::Path;

use serde::Serialize;

use kgqa::EvalReport;

/// One row of the results file. Column order is the serialized field order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRow {
    pub model: String,
    pub kg_type: String,
    pub hops: usize,
    pub accuracy: f64,
    pub hits_at_1: f64,
    pub hits_at_5: f64,
    pub hits_at_10: f64,
}

impl ResultRow {
    pub fn new(model: &str, kg_type: &str, hops: usize, report: &EvalReport) -> Self {
        Self {
            model: model.to_string(),
            kg_type: kg_type.to_string(),
            hops,
            accuracy: report.accuracy,
            hits_at_1: report.hits_at_1,
            hits_at_5: report.hits_at_5,
            hits_at_10: report.hits_at_10,
        }
    }
}

/// Append `row` to `path` without a header, creating the file if needed.
pub fn append_result(path: &Path, row: &ResultRow) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    writer.serialize(row)?;
    writer.flush()?;
    tracing::info!(path = %path.display(), "Appended results row");
    Ok(())
}

//! Tabular export of report rows. Pure functions of the rows and a declared
//! column list; nothing here touches the network.

use std::io::Write;
use std::path::Path;

use crate::error::Result;
use crate::hierarchy::FlatRow;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnSource {
    Field(String),
    Id,
    ParentId,
    Generation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub header: String,
    pub source: ColumnSource,
}

impl Column {
    pub fn field(header: &str, field: &str) -> Self {
        Self {
            header: header.to_string(),
            source: ColumnSource::Field(field.to_string()),
        }
    }

    pub fn derived(header: &str, source: ColumnSource) -> Self {
        Self {
            header: header.to_string(),
            source,
        }
    }

    fn cell(&self, row: &FlatRow) -> String {
        match &self.source {
            ColumnSource::Field(name) => row
                .record
                .get(name)
                .map(|v| v.to_string())
                .unwrap_or_default(),
            ColumnSource::Id => row.id.clone(),
            ColumnSource::ParentId => row.parent_id.clone().unwrap_or_default(),
            ColumnSource::Generation => row.depth.to_string(),
        }
    }
}

/// Layout of the reference-commission export.
pub fn commission_columns() -> Vec<Column> {
    vec![
        Column::derived("Generation", ColumnSource::Generation),
        Column::derived("Client Id", ColumnSource::Id),
        Column::field("Client Name", "name"),
        Column::derived("Referred By", ColumnSource::ParentId),
        Column::field("Join Date", "joinDate"),
        Column::field("Invested Amount", "investedAmount"),
        Column::field("Commission", "commission"),
        Column::field("Tenure (Months)", "tenureMonths"),
    ]
}

/// Header line followed by one line per row, cells in column order.
pub fn tabulate(rows: &[FlatRow], columns: &[Column]) -> Vec<Vec<String>> {
    let mut out = Vec::with_capacity(rows.len() + 1);
    out.push(columns.iter().map(|c| c.header.clone()).collect());
    for row in rows {
        out.push(columns.iter().map(|c| c.cell(row)).collect());
    }
    out
}

pub fn write_csv<W: Write>(rows: &[FlatRow], columns: &[Column], writer: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for line in tabulate(rows, columns) {
        wtr.write_record(&line)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn save_csv(rows: &[FlatRow], columns: &[Column], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    write_csv(rows, columns, std::io::BufWriter::new(file))?;
    tracing::info!(path = %path.display(), rows = rows.len(), "export written");
    Ok(())
}

use colored::Colorize;
use comfy_table::{Cell, Table};

use sipdesk::error::Result;
use sipdesk::parser::{self, ImportKind};

pub async fn run(file: &str, kind: ImportKind, limit: usize) -> Result<()> {
    let parsed = super::parse_upload(file, kind).await?;

    let mut table = Table::new();
    let mut header = vec!["Sr No"];
    header.extend(kind.fields().iter().map(|(_, column)| *column));
    table.set_header(header);
    for record in parsed.records.iter().take(limit) {
        let mut row = vec![Cell::new(record.sr_no)];
        for (field, _) in kind.fields() {
            row.push(Cell::new(
                record.get(field).map(|v| v.to_string()).unwrap_or_default(),
            ));
        }
        table.add_row(row);
    }
    println!("{} preview: {}\n{table}", kind.name(), parsed.file_name);
    if parsed.records.len() > limit {
        println!("... {} more rows", parsed.records.len() - limit);
    }

    let issues = parser::precheck(&parsed.records, kind);
    if issues.is_empty() {
        println!("{} rows, all required fields present", parsed.records.len());
        return Ok(());
    }
    let mut missing = Table::new();
    missing.set_header(vec!["Sr No", "Missing"]);
    for issue in &issues {
        missing.add_row(vec![Cell::new(issue.sr_no), Cell::new(issue.missing.join(", "))]);
    }
    println!(
        "{}\n{missing}",
        format!("{} of {} rows are incomplete", issues.len(), parsed.records.len()).yellow()
    );
    Ok(())
}

use std::sync::Arc;

use colored::Colorize;
use comfy_table::{Cell, Table};

use sipdesk::error::Result;
use sipdesk::ledger::ImportLedger;
use sipdesk::models::{Record, RecordStatus};
use sipdesk::parser::{self, ImportKind};
use sipdesk::remote::HttpApi;
use sipdesk::session::ImportSession;
use sipdesk::settings::{load_settings, SettingsSession};

pub(crate) fn status_cell(status: RecordStatus) -> Cell {
    match status {
        RecordStatus::Valid => Cell::new(status.label().green()),
        RecordStatus::Invalid => Cell::new(status.label().red().bold()),
        RecordStatus::Unknown => Cell::new(status.label().dimmed()),
    }
}

fn problem_table(records: &[Record]) -> Option<Table> {
    let problems: Vec<&Record> = records
        .iter()
        .filter(|r| r.status != RecordStatus::Valid)
        .collect();
    if problems.is_empty() {
        return None;
    }
    let mut table = Table::new();
    table.set_header(vec!["Sr No", "Status", "Message"]);
    for r in problems {
        table.add_row(vec![
            Cell::new(r.sr_no),
            status_cell(r.status),
            Cell::new(&r.message),
        ]);
    }
    Some(table)
}

fn print_problems(title: &str, records: &[Record]) {
    if let Some(table) = problem_table(records) {
        println!("{title}\n{table}");
    }
}

pub async fn run(file: &str, kind: ImportKind, verify_only: bool, force: bool) -> Result<()> {
    let parsed = super::parse_upload(file, kind).await?;
    let settings = load_settings();
    let mut ledger = ImportLedger::open(std::path::Path::new(&settings.data_dir))?;

    if !force {
        if let Some(prior) = ledger.find(&parsed.checksum) {
            println!(
                "This file has already been imported ({} records committed on {}). Use --force to import it again.",
                prior.committed, prior.committed_at
            );
            return Ok(());
        }
    }

    let issues = parser::precheck(&parsed.records, kind);
    if !issues.is_empty() {
        println!(
            "{}",
            format!("{} rows are missing required fields; the server will likely reject them.", issues.len())
                .yellow()
        );
    }

    let api = HttpApi::new(
        &settings.api_base_url,
        settings.timeout(),
        Arc::new(SettingsSession::new(&settings)),
    )?;
    let session = ImportSession::new(kind, api);
    let file_name = parsed.file_name.clone();
    session.load_file(parsed)?;

    let summary = session.verify().await?;
    print_problems("Verification", &session.records());
    println!(
        "{} {}: {} valid, {} invalid, {} unchecked",
        kind.name(),
        file_name,
        summary.valid.to_string().green(),
        summary.invalid.to_string().red(),
        summary.unknown
    );
    if verify_only {
        return Ok(());
    }

    let outcome = session.commit().await?;
    println!(
        "{} committed, {} left out",
        outcome.committed.to_string().green().bold(),
        outcome.rejected
    );
    print_problems("Not committed", &session.rejected());

    if let Some(checksum) = session.checksum() {
        ledger.record(&checksum, &file_name, kind.key(), outcome.committed)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_problem_table_lists_server_messages() {
        let mut ok = Record::new(1).with("name", "Asha");
        ok.status = RecordStatus::Valid;
        let mut bad = Record::new(2).with("name", "Ravi");
        bad.status = RecordStatus::Invalid;
        bad.message = "Aadhaar already registered".to_string();
        let unchecked = Record::new(3);

        let table = problem_table(&[ok.clone(), bad, unchecked]).unwrap().to_string();
        assert!(table.contains("Aadhaar already registered"));
        assert!(table.contains('2'));
        assert!(table.contains('3'));
        assert!(problem_table(&[ok]).is_none());
    }
}

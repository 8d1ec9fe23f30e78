use comfy_table::{Cell, Table};

use sipdesk::error::Result;
use sipdesk::ledger::ImportLedger;
use sipdesk::parser;
use sipdesk::settings::get_data_dir;

fn short_checksum(checksum: &str) -> String {
    checksum.chars().take(12).collect()
}

pub fn list() -> Result<()> {
    let ledger = ImportLedger::open(&get_data_dir())?;
    if ledger.entries().is_empty() {
        println!("No files committed yet.");
        return Ok(());
    }
    let mut table = Table::new();
    table.set_header(vec!["Committed At", "Kind", "File", "Records", "Checksum"]);
    for e in ledger.entries() {
        let kind = parser::get_by_key(&e.kind).map_or(e.kind.as_str(), |k| k.name());
        table.add_row(vec![
            Cell::new(&e.committed_at),
            Cell::new(kind),
            Cell::new(&e.file_name),
            Cell::new(e.committed),
            Cell::new(short_checksum(&e.checksum)),
        ]);
    }
    println!("Imports\n{table}");
    Ok(())
}

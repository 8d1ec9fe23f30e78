use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

const LEDGER_FILE: &str = "imports.json";

/// One committed upload, keyed by the SHA-256 of the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub checksum: String,
    pub file_name: String,
    pub kind: String,
    pub committed: usize,
    pub committed_at: String,
}

/// Files already committed from this machine, so the same sheet isn't
/// imported twice across runs.
pub struct ImportLedger {
    path: PathBuf,
    entries: Vec<LedgerEntry>,
}

impl ImportLedger {
    pub fn open(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(LEDGER_FILE);
        let entries = if path.exists() {
            serde_json::from_str(&std::fs::read_to_string(&path)?)?
        } else {
            Vec::new()
        };
        Ok(Self { path, entries })
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn find(&self, checksum: &str) -> Option<&LedgerEntry> {
        self.entries.iter().find(|e| e.checksum == checksum)
    }

    pub fn record(&mut self, checksum: &str, file_name: &str, kind: &str, committed: usize) -> Result<()> {
        self.entries.push(LedgerEntry {
            checksum: checksum.to_string(),
            file_name: file_name.to_string(),
            kind: kind.to_string(),
            committed,
            committed_at: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        });
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.entries)?;
        std::fs::write(&self.path, format!("{json}\n"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_persists_and_finds() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = ImportLedger::open(dir.path()).unwrap();
        assert!(ledger.entries().is_empty());
        ledger.record("abc", "clients.xlsx", "client", 12).unwrap();

        let reopened = ImportLedger::open(dir.path()).unwrap();
        let entry = reopened.find("abc").unwrap();
        assert_eq!(entry.file_name, "clients.xlsx");
        assert_eq!(entry.committed, 12);
        assert!(reopened.find("def").is_none());
    }

    #[test]
    fn test_record_creates_missing_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("deep").join("data");
        let mut ledger = ImportLedger::open(&nested).unwrap();
        ledger.record("abc", "m.csv", "sip_member", 1).unwrap();
        assert!(nested.join(LEDGER_FILE).exists());
    }

    #[test]
    fn test_corrupt_ledger_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(LEDGER_FILE), "{not json").unwrap();
        assert!(ImportLedger::open(dir.path()).is_err());
    }
}

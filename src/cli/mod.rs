pub mod config;
pub mod import;
pub mod imports;
pub mod preview;
pub mod report;

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use sipdesk::error::{Result, SipError};
use sipdesk::parser::{self, ImportKind, ParsedFile};

fn parse_kind(s: &str) -> std::result::Result<ImportKind, String> {
    parser::get_by_key(s).ok_or_else(|| {
        let known: Vec<&str> = parser::ALL_KINDS.iter().map(|k| k.key()).collect();
        format!("unknown import kind '{s}' (expected one of: {})", known.join(", "))
    })
}

/// Reads and decodes an upload off the async workers.
pub(crate) async fn parse_upload(file: &str, kind: ImportKind) -> Result<ParsedFile> {
    let path = PathBuf::from(file);
    tokio::task::spawn_blocking(move || parser::parse_file(&path, kind))
        .await
        .map_err(|e| SipError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
}

#[derive(Parser)]
#[command(
    name = "sipdesk",
    version,
    about = "Import clients and SIP members, and review referral commission, for a branch console."
)]
pub struct Cli {
    /// Log engine activity to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Verify a CSV/XLS/XLSX sheet with the server, then commit the valid rows.
    Import {
        /// Path to the sheet
        file: String,
        /// Record kind: client or sip-member
        #[arg(long, value_parser = parse_kind)]
        kind: ImportKind,
        /// Stop after verification
        #[arg(long)]
        verify_only: bool,
        /// Import even if this exact file was committed before
        #[arg(long)]
        force: bool,
    },
    /// Parse a sheet and check required columns without contacting the server.
    Preview {
        /// Path to the sheet
        file: String,
        /// Record kind: client or sip-member
        #[arg(long, value_parser = parse_kind)]
        kind: ImportKind,
        /// Rows to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Generate reports.
    Report {
        #[command(subcommand)]
        command: ReportCommands,
    },
    /// Show or change settings.
    Config {
        /// Base URL of the branch API
        #[arg(long = "api-url")]
        api_url: Option<String>,
        /// Directory for exports and the import ledger
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
        /// Branch id sent with every request
        #[arg(long)]
        branch: Option<String>,
        /// File holding the bearer token
        #[arg(long = "token-file")]
        token_file: Option<String>,
        /// Request timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// List files committed from this machine.
    Imports,
}

#[derive(Subcommand)]
pub enum ReportCommands {
    /// Reference commission by referral generation.
    Commission {
        /// Client id at the top of the referral tree
        #[arg(long)]
        client: Option<String>,
        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,
        /// End date (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,
        /// Plan category id
        #[arg(long)]
        category: Option<String>,
        /// Print the referral tree instead of the flat table
        #[arg(long)]
        tree: bool,
        /// Write the rows to CSV (default: <data_dir>/exports/commission-<date>.csv)
        #[arg(long, num_args = 0..=1, default_missing_value = "")]
        export: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kind_accepts_dashes() {
        assert_eq!(parse_kind("sip-member").unwrap(), ImportKind::SipMember);
        assert_eq!(parse_kind("client").unwrap(), ImportKind::Client);
        let err = parse_kind("agent").unwrap_err();
        assert!(err.contains("client, sip_member"));
    }

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}

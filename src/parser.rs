use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{Result, SipError};
use crate::models::{Record, Scalar};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// `None` when the serial falls outside the calendar chrono can represent.
pub fn excel_serial_to_date(serial: f64) -> Option<String> {
    if !serial.is_finite() {
        return None;
    }
    // Excel epoch is 1899-12-30 (accounting for the 1900 leap year bug)
    let base = chrono::NaiveDate::from_ymd_opt(1899, 12, 30)?;
    let offset = chrono::Duration::try_days(serial.floor() as i64)?;
    let date = base.checked_add_signed(offset)?;
    Some(date.format("%Y-%m-%d").to_string())
}

pub fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn text_cell(raw: &str) -> Scalar {
    let s = raw.trim();
    if s.is_empty() {
        Scalar::Null
    } else {
        Scalar::Text(s.to_string())
    }
}

fn normalize_header(s: &str) -> String {
    s.trim().to_lowercase()
}

// ---------------------------------------------------------------------------
// Content types: declared by the caller, never sniffed
// ---------------------------------------------------------------------------

pub const MIME_XLS: &str = "application/vnd.ms-excel";
pub const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const MIME_CSV: &str = "text/csv";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Xls,
    Xlsx,
    Csv,
}

impl ContentType {
    pub fn from_mime(mime: &str) -> Result<Self> {
        // Parameters such as "; charset=utf-8" don't change the format.
        let base = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        match base.as_str() {
            MIME_XLS => Ok(Self::Xls),
            MIME_XLSX => Ok(Self::Xlsx),
            MIME_CSV | "application/csv" => Ok(Self::Csv),
            _ => Err(SipError::UnsupportedFileType(mime.to_string())),
        }
    }

    /// The content type a file upload would declare for this extension.
    pub fn for_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "xls" => Ok(Self::Xls),
            "xlsx" => Ok(Self::Xlsx),
            "csv" => Ok(Self::Csv),
            _ => Err(SipError::UnsupportedFileType(format!(
                "{} (expected .xls, .xlsx or .csv)",
                path.display()
            ))),
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            Self::Xls => MIME_XLS,
            Self::Xlsx => MIME_XLSX,
            Self::Csv => MIME_CSV,
        }
    }
}

// ---------------------------------------------------------------------------
// Import kinds, each with its own column layout
// ---------------------------------------------------------------------------

/// Ordered (output field, source column header) pairs.
pub type FieldMap = [(&'static str, &'static str)];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportKind {
    Client,
    SipMember,
}

const CLIENT_FIELDS: &FieldMap = &[
    ("name", "Name"),
    ("mobile", "Mobile No"),
    ("email", "Email"),
    ("aadhaar", "Aadhaar No"),
    ("pan", "PAN No"),
    ("address", "Address"),
    ("city", "City"),
    ("pincode", "Pincode"),
    ("dateOfBirth", "Date of Birth"),
    ("referenceId", "Reference Id"),
    ("branchId", "Branch Id"),
    ("joinDate", "Join Date"),
];

const SIP_MEMBER_FIELDS: &FieldMap = &[
    ("clientId", "Client Id"),
    ("planId", "Plan Id"),
    ("installmentAmount", "Installment Amount"),
    ("startDate", "Start Date"),
    ("tenureMonths", "Tenure (Months)"),
    ("nomineeName", "Nominee Name"),
    ("nomineeRelation", "Nominee Relation"),
    ("branchId", "Branch Id"),
];

impl ImportKind {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::SipMember => "sip_member",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Client => "Client",
            Self::SipMember => "SIP Member",
        }
    }

    pub fn fields(&self) -> &'static FieldMap {
        match self {
            Self::Client => CLIENT_FIELDS,
            Self::SipMember => SIP_MEMBER_FIELDS,
        }
    }

    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            Self::Client => &["name", "mobile", "aadhaar", "branchId"],
            Self::SipMember => &["clientId", "planId", "installmentAmount", "startDate"],
        }
    }

    pub fn verify_path(&self) -> &'static str {
        match self {
            Self::Client => "client/import/verify",
            Self::SipMember => "sip-member/import/verify",
        }
    }

    pub fn commit_path(&self) -> &'static str {
        match self {
            Self::Client => "client/import",
            Self::SipMember => "sip-member/import",
        }
    }
}

pub const ALL_KINDS: &[ImportKind] = &[ImportKind::Client, ImportKind::SipMember];

pub fn get_by_key(key: &str) -> Option<ImportKind> {
    let key = key.replace('-', "_");
    ALL_KINDS.iter().find(|k| k.key() == key).copied()
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Decodes an upload into records, one per non-blank data row.
///
/// The first row is the header; columns are matched to `fields` by header
/// text, ignoring case and surrounding whitespace. A mapped column missing
/// from the header yields `Null` for that field. `srNo` runs 1..n.
pub fn parse(bytes: &[u8], content_type: ContentType, fields: &FieldMap) -> Result<Vec<Record>> {
    let grid = match content_type {
        ContentType::Csv => read_csv(bytes)?,
        ContentType::Xls | ContentType::Xlsx => read_spreadsheet(bytes, content_type)?,
    };
    Ok(map_rows(grid, fields))
}

fn map_rows(grid: Vec<Vec<Scalar>>, fields: &FieldMap) -> Vec<Record> {
    let mut rows = grid.into_iter();
    let Some(header) = rows.next() else {
        return Vec::new();
    };
    let header: Vec<String> = header.iter().map(|c| normalize_header(&c.to_string())).collect();
    let positions: Vec<(&str, Option<usize>)> = fields
        .iter()
        .map(|(field, column)| {
            let wanted = normalize_header(column);
            (*field, header.iter().position(|h| *h == wanted))
        })
        .collect();

    let mut records = Vec::new();
    for row in rows {
        if row.iter().all(Scalar::is_blank) {
            continue;
        }
        let mut record = Record::new(records.len() as u32 + 1);
        for (field, idx) in &positions {
            let value = idx
                .and_then(|i| row.get(i))
                .cloned()
                .unwrap_or(Scalar::Null);
            record.set(field, value);
        }
        records.push(record);
    }
    records
}

fn read_csv(bytes: &[u8]) -> Result<Vec<Vec<Scalar>>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);
    // Sheets saved as Windows-1252 still load; undecodable bytes become U+FFFD.
    let mut grid = Vec::new();
    for result in rdr.byte_records() {
        let record = result?;
        grid.push(
            record
                .iter()
                .map(|cell| text_cell(&String::from_utf8_lossy(cell)))
                .collect(),
        );
    }
    Ok(grid)
}

#[cfg(feature = "excel")]
fn read_spreadsheet(bytes: &[u8], content_type: ContentType) -> Result<Vec<Vec<Scalar>>> {
    use calamine::{Reader, Xls, Xlsx};

    let cursor = std::io::Cursor::new(bytes);
    match content_type {
        ContentType::Xlsx => {
            let workbook: Xlsx<_> =
                Xlsx::new(cursor).map_err(|e| SipError::Spreadsheet(format!("Failed to open XLSX: {e}")))?;
            first_sheet(workbook)
        }
        _ => {
            let workbook: Xls<_> =
                Xls::new(cursor).map_err(|e| SipError::Spreadsheet(format!("Failed to open XLS: {e}")))?;
            first_sheet(workbook)
        }
    }
}

#[cfg(feature = "excel")]
fn first_sheet<RS, R>(mut workbook: R) -> Result<Vec<Vec<Scalar>>>
where
    RS: std::io::Read + std::io::Seek,
    R: calamine::Reader<RS>,
    R::Error: std::fmt::Display,
{
    let Some(range) = workbook.worksheet_range_at(0) else {
        return Ok(Vec::new());
    };
    let range = range.map_err(|e| SipError::Spreadsheet(e.to_string()))?;
    Ok(range
        .rows()
        .map(|row| row.iter().map(scalar_from_cell).collect())
        .collect())
}

#[cfg(not(feature = "excel"))]
fn read_spreadsheet(_bytes: &[u8], content_type: ContentType) -> Result<Vec<Vec<Scalar>>> {
    Err(SipError::UnsupportedFileType(format!(
        "{} (built without spreadsheet support)",
        content_type.mime()
    )))
}

#[cfg(feature = "excel")]
fn scalar_from_cell(cell: &calamine::Data) -> Scalar {
    use calamine::Data;
    match cell {
        Data::Int(i) => Scalar::Number(*i as f64),
        Data::Float(f) => Scalar::Number(*f),
        Data::Bool(b) => Scalar::Bool(*b),
        Data::String(s) => text_cell(s),
        Data::DateTime(dt) => excel_serial_to_date(dt.as_f64())
            .map(Scalar::Text)
            .unwrap_or(Scalar::Number(dt.as_f64())),
        Data::DateTimeIso(s) => text_cell(s.get(..10).unwrap_or(s)),
        Data::DurationIso(s) => text_cell(s),
        Data::Error(_) | Data::Empty => Scalar::Null,
    }
}

/// A parsed upload together with the fingerprint of its bytes.
#[derive(Debug, Clone)]
pub struct ParsedFile {
    pub file_name: String,
    pub checksum: String,
    pub records: Vec<Record>,
}

pub fn parse_file(file_path: &Path, kind: ImportKind) -> Result<ParsedFile> {
    let content_type = ContentType::for_path(file_path)?;
    let data = std::fs::read(file_path)?;
    let records = parse(&data, content_type, kind.fields())?;
    tracing::debug!(
        file = %file_path.display(),
        kind = kind.key(),
        records = records.len(),
        "parsed upload"
    );
    Ok(ParsedFile {
        file_name: file_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("")
            .to_string(),
        checksum: compute_checksum(&data),
        records,
    })
}

// ---------------------------------------------------------------------------
// Offline precheck
// ---------------------------------------------------------------------------

pub struct PrecheckIssue {
    pub sr_no: u32,
    pub missing: Vec<&'static str>,
}

/// Lists records with blank required fields. Advisory only: statuses are
/// left untouched and the server still decides.
pub fn precheck(records: &[Record], kind: ImportKind) -> Vec<PrecheckIssue> {
    records
        .iter()
        .filter_map(|r| {
            let missing: Vec<&'static str> = kind
                .required_fields()
                .iter()
                .copied()
                .filter(|f| r.get(f).map_or(true, Scalar::is_blank))
                .collect();
            (!missing.is_empty()).then_some(PrecheckIssue {
                sr_no: r.sr_no,
                missing,
            })
        })
        .collect()
}

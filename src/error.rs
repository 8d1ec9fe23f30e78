use thiserror::Error;

#[derive(Error, Debug)]
pub enum SipError {
    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("No records to {0}")]
    EmptyBatch(&'static str),

    #[error("Request failed: {0}")]
    Transport(String),

    #[error("Every record was rejected by the server; nothing to commit")]
    ValidationRejected,

    #[error("This batch has already been committed")]
    AlreadyCommitted,

    #[error("Invalid report filter: {0}")]
    InvalidFilter(String),

    #[error("Cannot {op} while the session is {state}")]
    InvalidState { op: &'static str, state: &'static str },

    #[error("A {0} request is already in progress")]
    Busy(&'static str),

    #[error("Discarded a stale {0} response (the session was reset)")]
    Stale(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Spreadsheet error: {0}")]
    Spreadsheet(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Settings error: {0}")]
    Settings(String),
}

/// Field-less discriminant of [`SipError`], for callers that branch on the
/// failure class rather than its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UnsupportedFileType,
    EmptyBatch,
    Transport,
    ValidationRejected,
    AlreadyCommitted,
    InvalidFilter,
    InvalidState,
    Busy,
    Stale,
    Io,
    Csv,
    Spreadsheet,
    Json,
    Settings,
}

impl SipError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedFileType(_) => ErrorKind::UnsupportedFileType,
            Self::EmptyBatch(_) => ErrorKind::EmptyBatch,
            Self::Transport(_) => ErrorKind::Transport,
            Self::ValidationRejected => ErrorKind::ValidationRejected,
            Self::AlreadyCommitted => ErrorKind::AlreadyCommitted,
            Self::InvalidFilter(_) => ErrorKind::InvalidFilter,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::Busy(_) => ErrorKind::Busy,
            Self::Stale(_) => ErrorKind::Stale,
            Self::Io(_) => ErrorKind::Io,
            Self::Csv(_) => ErrorKind::Csv,
            Self::Spreadsheet(_) => ErrorKind::Spreadsheet,
            Self::Json(_) => ErrorKind::Json,
            Self::Settings(_) => ErrorKind::Settings,
        }
    }
}

impl From<reqwest::Error> for SipError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SipError::Transport(format!("timed out: {e}"))
        } else {
            SipError::Transport(e.to_string())
        }
    }
}

#[cfg(feature = "excel")]
impl From<calamine::Error> for SipError {
    fn from(e: calamine::Error) -> Self {
        SipError::Spreadsheet(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SipError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_variant() {
        assert_eq!(SipError::AlreadyCommitted.kind(), ErrorKind::AlreadyCommitted);
        assert_eq!(SipError::Busy("verify").kind(), ErrorKind::Busy);
        assert_eq!(
            SipError::InvalidState { op: "commit", state: "loaded" }.kind(),
            ErrorKind::InvalidState
        );
    }

    #[test]
    fn test_messages_are_human_readable() {
        let e = SipError::InvalidState { op: "commit", state: "loaded" };
        assert_eq!(e.to_string(), "Cannot commit while the session is loaded");
        assert_eq!(SipError::EmptyBatch("verify").to_string(), "No records to verify");
    }
}

//! Upload → verify → commit workflow for one batch of records.
//!
//! ```text
//! Empty ─load─▶ Loaded ─verify─▶ Verifying ─▶ Verified ─commit─▶ Committing ─▶ Committed
//!                  ▲                 │ fail        │  ▲ re-verify      │ fail
//!                  └─────────────────┘             │  └───────────────┘
//!                                                  └──────────────────────────▶ (load/clear from anywhere)
//! ```
//!
//! Methods take `&self`; the state lives behind a mutex that is never held
//! across a network await. While a request is out the session sits in a
//! transient state, so a second verify or commit is refused with `Busy`.
//! `load` and `clear` bump a generation counter, and a response that comes
//! back under an older generation is dropped as `Stale`.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{Result, SipError};
use crate::models::{Record, RecordStatus};
use crate::parser::{ImportKind, ParsedFile};
use crate::remote::ImportBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Empty,
    Loaded,
    Verifying,
    Verified,
    Committing,
    Committed,
}

impl SessionState {
    pub fn label(self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Loaded => "loaded",
            Self::Verifying => "verifying",
            Self::Verified => "verified",
            Self::Committing => "committing",
            Self::Committed => "committed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VerifySummary {
    pub valid: usize,
    pub invalid: usize,
    pub unknown: usize,
}

impl VerifySummary {
    fn of(records: &[Record]) -> Self {
        let mut s = Self::default();
        for r in records {
            match r.status {
                RecordStatus::Valid => s.valid += 1,
                RecordStatus::Invalid => s.invalid += 1,
                RecordStatus::Unknown => s.unknown += 1,
            }
        }
        s
    }

    /// Nothing survived validation, so commit will be refused.
    pub fn all_rejected(&self) -> bool {
        self.valid == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitOutcome {
    pub committed: usize,
    pub rejected: usize,
}

#[derive(Debug)]
struct Inner {
    state: SessionState,
    records: Vec<Record>,
    rejected: Vec<Record>,
    checksum: Option<String>,
    generation: u64,
}

pub struct ImportSession<B> {
    kind: ImportKind,
    backend: B,
    inner: Mutex<Inner>,
}

impl<B: ImportBackend> ImportSession<B> {
    pub fn new(kind: ImportKind, backend: B) -> Self {
        Self {
            kind,
            backend,
            inner: Mutex::new(Inner {
                state: SessionState::Empty,
                records: Vec::new(),
                rejected: Vec::new(),
                checksum: None,
                generation: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn kind(&self) -> ImportKind {
        self.kind
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn records(&self) -> Vec<Record> {
        self.lock().records.clone()
    }

    /// Records left out of the last commit, with the server's messages.
    pub fn rejected(&self) -> Vec<Record> {
        self.lock().rejected.clone()
    }

    pub fn checksum(&self) -> Option<String> {
        self.lock().checksum.clone()
    }

    /// Replaces the batch. Any earlier verification, commit or in-flight
    /// request is forgotten.
    pub fn load(&self, records: Vec<Record>) -> Result<()> {
        self.load_with_checksum(records, None)
    }

    pub fn load_file(&self, file: ParsedFile) -> Result<()> {
        self.load_with_checksum(file.records, Some(file.checksum))
    }

    fn load_with_checksum(&self, mut records: Vec<Record>, checksum: Option<String>) -> Result<()> {
        if records.is_empty() {
            return Err(SipError::EmptyBatch("load"));
        }
        records.iter_mut().for_each(Record::reset_status);
        let mut inner = self.lock();
        inner.generation += 1;
        inner.state = SessionState::Loaded;
        inner.records = records;
        inner.rejected.clear();
        inner.checksum = checksum;
        tracing::debug!(kind = self.kind.key(), records = inner.records.len(), "batch loaded");
        Ok(())
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.generation += 1;
        inner.state = SessionState::Empty;
        inner.records.clear();
        inner.rejected.clear();
        inner.checksum = None;
        tracing::debug!(kind = self.kind.key(), "session cleared");
    }

    pub async fn verify(&self) -> Result<VerifySummary> {
        let (batch, generation) = {
            let mut inner = self.lock();
            match inner.state {
                SessionState::Loaded | SessionState::Verified => {}
                SessionState::Verifying => return Err(SipError::Busy("verify")),
                SessionState::Committing => return Err(SipError::Busy("commit")),
                other => {
                    return Err(SipError::InvalidState {
                        op: "verify",
                        state: other.label(),
                    })
                }
            }
            if inner.records.is_empty() {
                return Err(SipError::EmptyBatch("verify"));
            }
            inner.state = SessionState::Verifying;
            (inner.records.clone(), inner.generation)
        };

        tracing::debug!(kind = self.kind.key(), records = batch.len(), "verifying batch");
        let result = self.backend.verify(self.kind, &batch).await;

        let mut inner = self.lock();
        if inner.generation != generation {
            tracing::warn!(kind = self.kind.key(), "verify response arrived after reset");
            return Err(SipError::Stale("verify"));
        }
        let merged = result.and_then(|response| {
            if !response.status && response.records.is_empty() {
                return Err(SipError::Transport(
                    response
                        .message
                        .unwrap_or_else(|| "verification was refused by the server".to_string()),
                ));
            }
            correlate(&batch, &response.records)
        });
        match merged {
            Ok(annotations) => {
                for (record, (status, message)) in inner.records.iter_mut().zip(annotations) {
                    record.status = status;
                    record.message = message;
                }
                inner.state = SessionState::Verified;
                let summary = VerifySummary::of(&inner.records);
                tracing::info!(
                    kind = self.kind.key(),
                    valid = summary.valid,
                    invalid = summary.invalid,
                    "batch verified"
                );
                Ok(summary)
            }
            Err(e) => {
                inner.state = SessionState::Loaded;
                Err(e)
            }
        }
    }

    pub async fn commit(&self) -> Result<CommitOutcome> {
        let (to_send, generation) = {
            let mut inner = self.lock();
            match inner.state {
                SessionState::Verified => {}
                SessionState::Committed => return Err(SipError::AlreadyCommitted),
                SessionState::Verifying => return Err(SipError::Busy("verify")),
                SessionState::Committing => return Err(SipError::Busy("commit")),
                other => {
                    return Err(SipError::InvalidState {
                        op: "commit",
                        state: other.label(),
                    })
                }
            }
            if inner.records.is_empty() {
                return Err(SipError::EmptyBatch("commit"));
            }
            let to_send: Vec<Record> = inner
                .records
                .iter()
                .filter(|r| r.status == RecordStatus::Valid)
                .cloned()
                .collect();
            if to_send.is_empty() {
                return Err(SipError::ValidationRejected);
            }
            inner.state = SessionState::Committing;
            (to_send, inner.generation)
        };

        tracing::debug!(kind = self.kind.key(), records = to_send.len(), "committing batch");
        let result = self.backend.commit(self.kind, &to_send).await;

        let mut inner = self.lock();
        if inner.generation != generation {
            tracing::warn!(
                kind = self.kind.key(),
                "commit response arrived after reset; the server may still have saved it"
            );
            return Err(SipError::Stale("commit"));
        }
        match result {
            Ok(response) if !response.status && response.records.is_empty() => {
                inner.state = SessionState::Verified;
                Err(SipError::Transport(
                    response
                        .message
                        .unwrap_or_else(|| "commit was refused by the server".to_string()),
                ))
            }
            Ok(response) => {
                let rejected: Vec<Record> = inner
                    .records
                    .iter()
                    .filter(|r| r.status != RecordStatus::Valid)
                    .cloned()
                    .collect();
                inner.records = if response.records.is_empty() {
                    to_send
                } else {
                    response.records
                };
                inner.rejected = rejected;
                inner.state = SessionState::Committed;
                let outcome = CommitOutcome {
                    committed: inner.records.len(),
                    rejected: inner.rejected.len(),
                };
                tracing::info!(
                    kind = self.kind.key(),
                    committed = outcome.committed,
                    rejected = outcome.rejected,
                    "batch committed"
                );
                Ok(outcome)
            }
            Err(e) => {
                inner.state = SessionState::Verified;
                Err(e)
            }
        }
    }
}

/// Pairs each batch record with its annotation from the response.
///
/// When every returned record names a `srNo` covering the batch exactly,
/// pairing is by `srNo`; otherwise it is positional and the lengths must
/// agree. Nothing is applied unless the whole response lines up.
fn correlate(batch: &[Record], response: &[Record]) -> Result<Vec<(RecordStatus, String)>> {
    if response.len() != batch.len() {
        return Err(SipError::Transport(format!(
            "server returned {} records for a batch of {}",
            response.len(),
            batch.len()
        )));
    }
    if response.iter().all(|r| r.sr_no != 0) {
        let by_sr_no: HashMap<u32, &Record> = response.iter().map(|r| (r.sr_no, r)).collect();
        if by_sr_no.len() == batch.len() {
            let keyed: Option<Vec<_>> = batch
                .iter()
                .map(|b| by_sr_no.get(&b.sr_no).map(|r| (r.status, r.message.clone())))
                .collect();
            if let Some(keyed) = keyed {
                return Ok(keyed);
            }
        }
    }
    Ok(response.iter().map(|r| (r.status, r.message.clone())).collect())
}

//! Consolidation Engine: one document per (Subject, Unit)
//!
//! State is read from disk on every call, never stored:
//! ```text
//!            submit (any mode)                submit (APPEND)
//!   EMPTY ─────────────────────────► PRESENT ◄────────────────┐
//!                                      │  │                   │
//!                                      │  └───────────────────┘
//!                                      │  submit (OVERWRITE)
//!                                      └──────────► PRESENT (replaced)
//! ```
//!
//! Write protocol for a submission:
//! render ──► [read existing ──► merge] ──► backup ──► write document ──► write transcript
//!
//! Anything failing before the document write leaves the unit untouched.
//! A transcript failure after the document write puts the old document and
//! the old backup slot back.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

use crate::document::DocumentBackend;
use crate::merge::MergeError;
use crate::mirror::{MirrorError, MirrorStore};
use crate::render::RenderError;
use crate::vault::{self, verify, Vault, VaultError};

/// `March 02, 2026 at 04:45 PM`
pub const TIMESTAMP_FORMAT: &str = "%B %d, %Y at %I:%M %p";

// ============================================================================
// DATA STRUCTURES
// ============================================================================

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    Append,
    Overwrite,
}

/// One note submission. Carries everything the engine needs; there is no
/// session state behind it.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SubmitRequest {
    pub subject: String,
    pub unit: u32,
    pub note_text: String,
    pub mode: WriteMode,
}

impl SubmitRequest {
    pub fn new(subject: impl Into<String>, unit: u32, note_text: impl Into<String>, mode: WriteMode) -> Self {
        SubmitRequest {
            subject: subject.into(),
            unit,
            note_text: note_text.into(),
            mode,
        }
    }
}

/// User-facing outcome of a submit or undo
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    Created,
    Appended,
    Overwrote,
    Undone,
    NoBackupAvailable,
    /// Input refused before any work (empty note, unknown subject, bad unit)
    Rejected,
    RenderFailed,
    MergeFailed,
    WriteFailed,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Created => "created",
            Status::Appended => "appended",
            Status::Overwrote => "overwrote",
            Status::Undone => "undone",
            Status::NoBackupAvailable => "no-backup-available",
            Status::Rejected => "rejected",
            Status::RenderFailed => "render-failed",
            Status::MergeFailed => "merge-failed",
            Status::WriteFailed => "write-failed",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Status::Created | Status::Appended | Status::Overwrote | Status::Undone
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SubmitOutcome {
    pub status: Status,
    pub subject: String,
    pub unit: u32,
    pub path: PathBuf,
    pub page_count: usize,
    /// SHA-256 of the committed document
    pub fingerprint: String,
    pub timestamp: String,
}

impl SubmitOutcome {
    pub fn message(&self) -> String {
        match self.status {
            Status::Created => format!("Created {} Unit {}", self.subject, self.unit),
            Status::Appended => format!("Added to {} Unit {}", self.subject, self.unit),
            Status::Overwrote => format!("Overwrote {} Unit {}", self.subject, self.unit),
            other => format!("{} Unit {}: {}", self.subject, self.unit, other),
        }
    }
}

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum ConsolidationError {
    #[error("Note is empty")]
    EmptyNote,

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error("Render failed: {0}")]
    Render(#[from] RenderError),

    #[error("Merge failed: {0}")]
    Merge(#[from] MergeError),

    #[error("Backup failed, document left unchanged: {source}")]
    Backup { source: VaultError },

    #[error("Transcript update failed, unit rolled back: {0}")]
    Mirror(#[from] MirrorError),
}

impl ConsolidationError {
    pub fn status(&self) -> Status {
        match self {
            ConsolidationError::EmptyNote => Status::Rejected,
            ConsolidationError::Vault(VaultError::Io { .. }) => Status::WriteFailed,
            ConsolidationError::Vault(_) => Status::Rejected,
            ConsolidationError::Render(_) => Status::RenderFailed,
            ConsolidationError::Merge(_) => Status::MergeFailed,
            ConsolidationError::Backup { .. } | ConsolidationError::Mirror(_) => Status::WriteFailed,
        }
    }
}

impl From<ConsolidationError> for String {
    fn from(e: ConsolidationError) -> String {
        format!("{}: {}", e.status(), e)
    }
}

// ============================================================================
// CLOCK
// ============================================================================

/// Source of the human-readable timestamp stamped on each submission
pub trait Clock: Send + Sync {
    fn timestamp(&self) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn timestamp(&self) -> String {
        chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
    }
}

/// Always returns the same timestamp
#[derive(Debug, Clone)]
pub struct FixedClock(pub String);

impl Clock for FixedClock {
    fn timestamp(&self) -> String {
        self.0.clone()
    }
}

// ============================================================================
// UNIT LOCKS
// ============================================================================

/// Per-(Subject, Unit) mutual exclusion shared by the engine and undo
#[derive(Debug, Default)]
pub struct UnitLocks {
    locks: Mutex<HashMap<(String, u32), Arc<Mutex<()>>>>,
}

impl UnitLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_for(&self, subject: &str, unit: u32) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry((subject.to_string(), unit))
            .or_default()
            .clone()
    }
}

// ============================================================================
// ENGINE
// ============================================================================

pub struct ConsolidationEngine {
    vault: Vault,
    mirror: MirrorStore,
    backend: Box<dyn DocumentBackend>,
    clock: Box<dyn Clock>,
    locks: Arc<UnitLocks>,
}

impl ConsolidationEngine {
    pub fn new(vault: Vault, backend: impl DocumentBackend + 'static) -> Self {
        ConsolidationEngine {
            mirror: MirrorStore::new(vault.clone()),
            vault,
            backend: Box::new(backend),
            clock: Box::new(SystemClock),
            locks: Arc::new(UnitLocks::new()),
        }
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    pub fn mirror(&self) -> &MirrorStore {
        &self.mirror
    }

    pub fn locks(&self) -> Arc<UnitLocks> {
        Arc::clone(&self.locks)
    }

    /// Consolidate one note into its unit's document
    pub fn submit(&self, request: &SubmitRequest) -> Result<SubmitOutcome, ConsolidationError> {
        let SubmitRequest {
            subject,
            unit,
            note_text,
            mode,
        } = request;
        let unit = *unit;

        if note_text.trim().is_empty() {
            return Err(ConsolidationError::EmptyNote);
        }
        self.vault.validate_unit(unit)?;
        if !self.vault.exists(subject) {
            return Err(VaultError::SubjectNotFound(subject.clone()).into());
        }

        let lock = self.locks.lock_for(subject, unit);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let doc_path = self.vault.document_path(subject, unit)?;
        let timestamp = self.clock.timestamp();
        let existing = self.vault.read_document(subject, unit)?;

        // 1. Render (and merge) entirely in memory
        let rendered = self.backend.render(note_text, &timestamp).map_err(|e| {
            log::error!("Render failed for {} Unit {}: {}", subject, unit, e);
            e
        })?;

        let (status, document) = match (&existing, mode) {
            (None, _) => (Status::Created, rendered),
            (Some(_), WriteMode::Overwrite) => (Status::Overwrote, rendered),
            (Some(old), WriteMode::Append) => {
                let merged = self.backend.merge(old, &rendered).map_err(|e| {
                    log::error!("Merge failed for {} Unit {}: {}", subject, unit, e);
                    e
                })?;
                (Status::Appended, merged)
            }
        };
        let page_count = self.backend.page_count(&document)?;

        // 2. Backup slot must hold the current version before it is replaced
        let mut prior_backup = None;
        if let Some(old) = &existing {
            let backup_path = self.vault.backup_path(subject, unit)?;
            let backup_failed = |source: VaultError| {
                log::error!("Backup failed for {} Unit {}: {}", subject, unit, source);
                ConsolidationError::Backup { source }
            };
            prior_backup = vault::read_if_exists(&backup_path).map_err(&backup_failed)?;
            vault::write_atomic(&backup_path, old).map_err(&backup_failed)?;
            log::debug!(
                "Backed up {} Unit {} ({})",
                subject,
                unit,
                verify::short(&verify::fingerprint(old))
            );
        }

        // 3. Commit the document
        vault::write_atomic(&doc_path, &document)?;

        // 4. Keep the transcript in lockstep
        let transcript = match status {
            Status::Appended => self.mirror.append_or_create(subject, unit, note_text, &timestamp),
            _ => self.mirror.overwrite(subject, unit, note_text, &timestamp),
        };
        if let Err(e) = transcript {
            log::warn!(
                "Transcript update failed for {} Unit {}, rolling back: {}",
                subject,
                unit,
                e
            );
            if let Err(re) = put_back(&doc_path, existing.as_deref()) {
                log::error!("Rollback of {} failed: {}", doc_path.display(), re);
            }
            if existing.is_some() {
                let backup_path = self.vault.backup_path(subject, unit)?;
                if let Err(re) = put_back(&backup_path, prior_backup.as_deref()) {
                    log::error!("Rollback of {} failed: {}", backup_path.display(), re);
                }
            }
            return Err(e.into());
        }

        let fingerprint = verify::fingerprint(&document);
        log::info!(
            "{} {} Unit {} ({} page(s), {})",
            status,
            subject,
            unit,
            page_count,
            verify::short(&fingerprint)
        );

        Ok(SubmitOutcome {
            status,
            subject: subject.clone(),
            unit,
            path: doc_path,
            page_count,
            fingerprint,
            timestamp,
        })
    }
}

/// Restore `path` to `bytes`, or remove it when there were none
fn put_back(path: &Path, bytes: Option<&[u8]>) -> Result<(), VaultError> {
    match bytes {
        Some(bytes) => vault::write_atomic(path, bytes),
        None => vault::remove_if_exists(path).map(|_| ()),
    }
}

//! The Vault: Subject/Unit namespace on the local filesystem
//!
//! Every Subject is a directory under the data root; every Unit is a
//! *virtual* entity that exists only through the files named after it.
//!
//! Layout:
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  <root>/                                                         │
//! │  ├── <Subject>/                                                  │
//! │  │   ├── Unit_<N>.<ext>        consolidated document             │
//! │  │   ├── Unit_<N>.<ext>.bak    single backup slot                │
//! │  │   └── Unit_<N>.md           mirror transcript                 │
//! │  └── <Subject>/ ...                                              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All document writes go through [`write_atomic`] so a reader never
//! observes a half-written file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::Config;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Invalid subject name: '{0}'")]
    InvalidName(String),

    #[error("Subject not found: {0}")]
    SubjectNotFound(String),

    #[error("Subject '{0}' already exists")]
    SubjectExists(String),

    #[error("Unit {unit} is out of range (1..={max})")]
    UnitOutOfRange { unit: u32, max: u32 },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl From<VaultError> for String {
    fn from(e: VaultError) -> String {
        e.to_string()
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> VaultError + '_ {
    move |source| VaultError::Io {
        path: path.to_path_buf(),
        source,
    }
}

// ============================================================================
// DATA STRUCTURES
// ============================================================================

/// A Unit file as shown in listings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnitSummary {
    /// Unit number (1-based)
    pub unit: u32,
    /// Human-readable size, e.g. "12.3 KB"
    pub size: String,
    /// Full path of the listed file
    pub path: PathBuf,
}

/// Keep alphanumerics, space, underscore and hyphen; trim; spaces become
/// underscores. Returns `None` when nothing usable is left.
pub fn sanitize_subject_name(raw: &str) -> Option<String> {
    let kept: String = raw
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '_' | '-'))
        .collect();
    let safe = kept.trim().replace(' ', "_");
    if safe.is_empty() {
        None
    } else {
        Some(safe)
    }
}

// ============================================================================
// THE VAULT
// ============================================================================

#[derive(Debug, Clone)]
pub struct Vault {
    /// Data root holding one directory per subject
    root: PathBuf,
    /// Highest accepted unit number
    max_units: u32,
    /// Consolidated document extension (without dot)
    extension: String,
}

impl Vault {
    pub fn new(root: impl Into<PathBuf>, max_units: u32, extension: impl Into<String>) -> Self {
        Vault {
            root: root.into(),
            max_units,
            extension: extension.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.root_dir.clone(),
            config.max_units,
            config.document_extension.clone(),
        )
    }

    /// Create the data root if it doesn't exist
    pub fn ensure_root(&self) -> Result<(), VaultError> {
        fs::create_dir_all(&self.root).map_err(io_err(&self.root))
    }

    pub fn validate_unit(&self, unit: u32) -> Result<(), VaultError> {
        if unit == 0 || unit > self.max_units {
            return Err(VaultError::UnitOutOfRange {
                unit,
                max: self.max_units,
            });
        }
        Ok(())
    }

    /// Resolve a subject directory. The name must already be in sanitized form.
    pub fn subject_path(&self, subject: &str) -> Result<PathBuf, VaultError> {
        match sanitize_subject_name(subject) {
            Some(safe) if safe == subject => Ok(self.root.join(subject)),
            _ => Err(VaultError::InvalidName(subject.to_string())),
        }
    }

    fn unit_file(&self, subject: &str, unit: u32, suffix: &str) -> Result<PathBuf, VaultError> {
        self.validate_unit(unit)?;
        Ok(self
            .subject_path(subject)?
            .join(format!("Unit_{}.{}", unit, suffix)))
    }

    pub fn document_path(&self, subject: &str, unit: u32) -> Result<PathBuf, VaultError> {
        self.unit_file(subject, unit, &self.extension)
    }

    pub fn backup_path(&self, subject: &str, unit: u32) -> Result<PathBuf, VaultError> {
        self.unit_file(subject, unit, &format!("{}.bak", self.extension))
    }

    pub fn transcript_path(&self, subject: &str, unit: u32) -> Result<PathBuf, VaultError> {
        self.unit_file(subject, unit, "md")
    }

    // ------------------------------------------------------------------------
    // Existence queries (namespace provider)
    // ------------------------------------------------------------------------

    pub fn exists(&self, subject: &str) -> bool {
        self.subject_path(subject)
            .map(|p| p.is_dir())
            .unwrap_or(false)
    }

    pub fn exists_unit_doc(&self, subject: &str, unit: u32) -> bool {
        self.document_path(subject, unit)
            .map(|p| p.is_file())
            .unwrap_or(false)
    }

    /// A unit exists iff its document or its transcript exists
    pub fn unit_exists(&self, subject: &str, unit: u32) -> bool {
        self.exists_unit_doc(subject, unit)
            || self
                .transcript_path(subject, unit)
                .map(|p| p.is_file())
                .unwrap_or(false)
    }

    pub fn has_backup(&self, subject: &str, unit: u32) -> bool {
        self.backup_path(subject, unit)
            .map(|p| p.is_file())
            .unwrap_or(false)
    }

    // ------------------------------------------------------------------------
    // Subject CRUD
    // ------------------------------------------------------------------------

    /// All subject directories, sorted
    pub fn list_subjects(&self) -> Result<Vec<String>, VaultError> {
        self.ensure_root()?;
        let mut subjects = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(io_err(&self.root))? {
            let entry = entry.map_err(io_err(&self.root))?;
            if entry.path().is_dir() {
                subjects.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        subjects.sort();
        Ok(subjects)
    }

    /// Create a subject, returning its sanitized name
    pub fn create_subject(&self, raw_name: &str) -> Result<String, VaultError> {
        self.ensure_root()?;
        let safe = sanitize_subject_name(raw_name)
            .ok_or_else(|| VaultError::InvalidName(raw_name.to_string()))?;

        let path = self.root.join(&safe);
        if path.exists() {
            return Err(VaultError::SubjectExists(safe));
        }
        fs::create_dir_all(&path).map_err(io_err(&path))?;
        log::info!("Created subject '{}'", safe);
        Ok(safe)
    }

    /// Rename a subject; the target name must be unused
    pub fn rename_subject(&self, old: &str, new_raw: &str) -> Result<String, VaultError> {
        let old_path = self.subject_path(old)?;
        if !old_path.is_dir() {
            return Err(VaultError::SubjectNotFound(old.to_string()));
        }

        let safe = sanitize_subject_name(new_raw)
            .ok_or_else(|| VaultError::InvalidName(new_raw.to_string()))?;
        let new_path = self.root.join(&safe);
        if new_path.exists() {
            return Err(VaultError::SubjectExists(safe));
        }

        fs::rename(&old_path, &new_path).map_err(io_err(&new_path))?;
        log::info!("Renamed subject '{}' -> '{}'", old, safe);
        Ok(safe)
    }

    /// Delete a subject with all of its units
    pub fn delete_subject(&self, subject: &str) -> Result<(), VaultError> {
        let path = self.subject_path(subject)?;
        if !path.is_dir() {
            return Err(VaultError::SubjectNotFound(subject.to_string()));
        }
        fs::remove_dir_all(&path).map_err(io_err(&path))?;
        log::info!("Deleted subject '{}'", subject);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Unit files
    // ------------------------------------------------------------------------

    /// Delete a unit's document and transcript. The backup slot is left
    /// behind. Returns whether anything was removed.
    pub fn delete_unit(&self, subject: &str, unit: u32) -> Result<bool, VaultError> {
        let mut deleted = false;
        for path in [
            self.document_path(subject, unit)?,
            self.transcript_path(subject, unit)?,
        ] {
            deleted |= remove_if_exists(&path)?;
        }
        if deleted {
            log::info!("Deleted {} Unit {}", subject, unit);
        }
        Ok(deleted)
    }

    /// Units that have a consolidated document
    pub fn list_units(&self, subject: &str) -> Result<Vec<UnitSummary>, VaultError> {
        self.collect_units(subject, |s, n| self.document_path(s, n))
    }

    /// Units that have a transcript for in-app reading
    pub fn list_readable_units(&self, subject: &str) -> Result<Vec<UnitSummary>, VaultError> {
        self.collect_units(subject, |s, n| self.transcript_path(s, n))
    }

    fn collect_units<F>(&self, subject: &str, path_for: F) -> Result<Vec<UnitSummary>, VaultError>
    where
        F: Fn(&str, u32) -> Result<PathBuf, VaultError>,
    {
        if !self.exists(subject) {
            return Ok(Vec::new());
        }

        let mut units = Vec::new();
        for n in 1..=self.max_units {
            let path = path_for(subject, n)?;
            if let Ok(meta) = fs::metadata(&path) {
                if meta.is_file() {
                    units.push(UnitSummary {
                        unit: n,
                        size: format!("{:.1} KB", meta.len() as f64 / 1024.0),
                        path,
                    });
                }
            }
        }
        Ok(units)
    }

    /// Current document bytes, or `None` if the unit has no document
    pub fn read_document(&self, subject: &str, unit: u32) -> Result<Option<Vec<u8>>, VaultError> {
        read_if_exists(&self.document_path(subject, unit)?)
    }

    /// Backup slot bytes, or `None` if no backup was ever taken
    pub fn read_backup(&self, subject: &str, unit: u32) -> Result<Option<Vec<u8>>, VaultError> {
        read_if_exists(&self.backup_path(subject, unit)?)
    }
}

// ============================================================================
// FILE HELPERS
// ============================================================================

pub fn read_if_exists(path: &Path) -> Result<Option<Vec<u8>>, VaultError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_err(path)(e)),
    }
}

pub fn remove_if_exists(path: &Path) -> Result<bool, VaultError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(io_err(path)(e)),
    }
}

/// Write `bytes` to `path` all-or-nothing.
///
/// 1. Write to a hidden temp file in the same directory
/// 2. fsync the temp file
/// 3. Rename over the target (atomic on POSIX)
///
/// On failure the temp file is removed and the target is untouched.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), VaultError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(io_err(dir))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let temp_path = dir.join(format!(".{}.tmp", file_name));

    let result = (|| {
        let mut file = fs::File::create(&temp_path).map_err(io_err(&temp_path))?;
        file.write_all(bytes).map_err(io_err(&temp_path))?;
        file.sync_all().map_err(io_err(&temp_path))?;
        fs::rename(&temp_path, path).map_err(io_err(path))
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

// ============================================================================
// VERIFICATION MODULE
// ============================================================================

pub mod verify {
    use sha2::{Digest, Sha256};

    /// SHA-256 hex digest identifying one version of a document
    pub fn fingerprint(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    /// Short form for log lines
    pub fn short(fingerprint: &str) -> &str {
        &fingerprint[..12.min(fingerprint.len())]
    }
}

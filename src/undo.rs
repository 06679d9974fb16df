//! Undo Manager: single-slot rollback of a unit's document
//!
//! The backup slot is written by the engine before every mutation and is
//! never cleared here, so undoing twice restores the same version twice.
//! The transcript is left alone.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError};

use crate::engine::{Status, UnitLocks};
use crate::vault::{self, verify, Vault, VaultError};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UndoOutcome {
    /// `Undone` or `NoBackupAvailable`
    pub status: Status,
    pub message: String,
}

pub struct UndoManager {
    vault: Vault,
    locks: Arc<UnitLocks>,
}

impl UndoManager {
    pub fn new(vault: Vault, locks: Arc<UnitLocks>) -> Self {
        UndoManager { vault, locks }
    }

    pub fn undo(&self, subject: &str, unit: u32) -> Result<UndoOutcome, VaultError> {
        self.vault.validate_unit(unit)?;

        let lock = self.locks.lock_for(subject, unit);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let backup = match self.vault.read_backup(subject, unit)? {
            Some(bytes) => bytes,
            None => {
                log::info!("Nothing to undo for {} Unit {}", subject, unit);
                return Ok(UndoOutcome {
                    status: Status::NoBackupAvailable,
                    message: format!("No backup available for {} Unit {}", subject, unit),
                });
            }
        };

        vault::write_atomic(&self.vault.document_path(subject, unit)?, &backup)?;
        log::info!(
            "Undone {} Unit {} (restored {})",
            subject,
            unit,
            verify::short(&verify::fingerprint(&backup))
        );

        Ok(UndoOutcome {
            status: Status::Undone,
            message: format!("Restored previous version of {} Unit {}", subject, unit),
        })
    }
}

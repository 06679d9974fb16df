//! Command layer: the operations a front end calls.
//!
//! ```text
//! CLI (main.rs)
//!     │
//!     ▼
//! Commands ◄──── This file
//!     │
//!     ├─────► Vault (Subject/Unit folders)
//!     │
//!     ├─────► Consolidation Engine ──► Renderer / Merger / Mirror Store
//!     │         │
//!     │         └──► Remote sync (after a successful commit)
//!     │
//!     ├─────► Undo Manager
//!     │
//!     └─────► Cortex (Ollama)
//! ```
//!
//! Every command returns `Result<T, String>` so errors can be shown as-is.

use serde::Serialize;

use crate::config::Config;
use crate::cortex::Cortex;
use crate::document::PdfBackend;
use crate::engine::{Clock, ConsolidationEngine, SubmitOutcome, SubmitRequest};
use crate::sync::{self, GithubSync, RemoteSync, SyncReport};
use crate::undo::{UndoManager, UndoOutcome};
use crate::vault::{UnitSummary, Vault};

/// Application state shared across commands
pub struct AppState {
    pub config: Config,
    pub vault: Vault,
    pub engine: ConsolidationEngine,
    pub undo: UndoManager,
    pub sync: Option<Box<dyn RemoteSync>>,
    pub cortex: Cortex,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let vault = Vault::from_config(&config);
        let engine = ConsolidationEngine::new(vault.clone(), PdfBackend::default());
        let undo = UndoManager::new(vault.clone(), engine.locks());
        let sync = GithubSync::from_config(&config).map(|s| Box::new(s) as Box<dyn RemoteSync>);
        let cortex = Cortex::from_config(&config.cortex);

        AppState {
            config,
            vault,
            engine,
            undo,
            sync,
            cortex,
        }
    }

    pub fn with_sync(mut self, sync: Option<Box<dyn RemoteSync>>) -> Self {
        self.sync = sync;
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.engine = self.engine.with_clock(clock);
        self
    }
}

/// Result of a note submission, including the follow-up push
#[derive(Serialize, Debug)]
pub struct SubmitResponse {
    pub outcome: SubmitOutcome,
    pub message: String,
    /// `None` when sync is not configured
    pub sync: Option<SyncReport>,
}

// ============================================================================
// SUBJECT COMMANDS
// ============================================================================

pub fn list_subjects(state: &AppState) -> Result<Vec<String>, String> {
    state.vault.list_subjects().map_err(String::from)
}

pub fn create_subject(state: &AppState, name: &str) -> Result<String, String> {
    state.vault.create_subject(name).map_err(String::from)
}

pub fn rename_subject(state: &AppState, old: &str, new_name: &str) -> Result<String, String> {
    state.vault.rename_subject(old, new_name).map_err(String::from)
}

pub fn delete_subject(state: &AppState, name: &str) -> Result<(), String> {
    state.vault.delete_subject(name).map_err(String::from)
}

// ============================================================================
// UNIT COMMANDS
// ============================================================================

pub fn list_units(state: &AppState, subject: &str) -> Result<Vec<UnitSummary>, String> {
    state.vault.list_units(subject).map_err(String::from)
}

pub fn list_readable_units(state: &AppState, subject: &str) -> Result<Vec<UnitSummary>, String> {
    state.vault.list_readable_units(subject).map_err(String::from)
}

pub fn delete_unit(state: &AppState, subject: &str, unit: u32) -> Result<bool, String> {
    state.vault.validate_unit(unit)?;
    state.vault.delete_unit(subject, unit).map_err(String::from)
}

/// Consolidate a note, then push the committed document if sync is configured
///
/// A failed push is reported in the response; the local commit stands.
pub async fn submit_note(state: &AppState, request: SubmitRequest) -> Result<SubmitResponse, String> {
    let outcome = state.engine.submit(&request)?;
    let message = outcome.message();

    let sync = match &state.sync {
        Some(remote) => {
            log::debug!("Syncing {}", outcome.path.display());
            let msg = sync::commit_message(&outcome.subject, outcome.unit);
            Some(remote.push(&outcome.path, &msg).await)
        }
        None => None,
    };

    Ok(SubmitResponse {
        outcome,
        message,
        sync,
    })
}

pub fn undo_unit(state: &AppState, subject: &str, unit: u32) -> Result<UndoOutcome, String> {
    state.undo.undo(subject, unit).map_err(String::from)
}

/// Transcript of a unit for in-app reading
pub fn read_transcript(state: &AppState, subject: &str, unit: u32) -> Result<Option<String>, String> {
    state.engine.mirror().load(subject, unit).map_err(String::from)
}

// ============================================================================
// CORTEX COMMANDS
// ============================================================================

pub async fn define_term(state: &AppState, term: &str) -> Result<String, String> {
    state.cortex.define(term).await.map_err(String::from)
}

pub async fn check_cortex_status(state: &AppState) -> Result<String, String> {
    state.cortex.check_status().await
}

pub async fn list_models(state: &AppState) -> Result<Vec<String>, String> {
    state.cortex.list_models().await.map_err(String::from)
}

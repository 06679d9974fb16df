//! Unit-Sync: hierarchical study notes, one consolidated document per unit
//!
//! ```text
//!   <root>/<Subject>/Unit_<N>.pdf      consolidated document
//!   <root>/<Subject>/Unit_<N>.pdf.bak  previous version (one-step undo)
//!   <root>/<Subject>/Unit_<N>.md       transcript of every note submitted
//! ```

pub mod commands;
pub mod config;
pub mod cortex;
pub mod document;
pub mod engine;
pub mod merge;
pub mod mirror;
pub mod render;
pub mod sync;
pub mod undo;
pub mod vault;

pub use config::{Config, ConfigError};
pub use cortex::{Cortex, CortexError};
pub use document::{DocumentBackend, PdfBackend};
pub use engine::{
    Clock, ConsolidationEngine, ConsolidationError, FixedClock, Status, SubmitOutcome,
    SubmitRequest, SystemClock, UnitLocks, WriteMode,
};
pub use merge::MergeError;
pub use mirror::{MirrorError, MirrorStore};
pub use render::RenderError;
pub use sync::{GithubSync, RemoteSync, SyncError, SyncReport};
pub use undo::{UndoManager, UndoOutcome};
pub use vault::{UnitSummary, Vault, VaultError};

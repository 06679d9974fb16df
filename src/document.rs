//! Document backend: the render/merge capability the engine is written against.

use crate::merge::{self, MergeError};
use crate::render::{self, RenderError, Theme};

/// Paginated document technology behind the Consolidation Engine.
///
/// Implementations must be pure: no filesystem access, no retained buffers.
pub trait DocumentBackend: Send + Sync {
    /// Render note text, headed by `timestamp`, into a standalone document
    fn render(&self, note_text: &str, timestamp: &str) -> Result<Vec<u8>, RenderError>;

    /// Pages of `existing` followed by the pages of `addition`
    fn merge(&self, existing: &[u8], addition: &[u8]) -> Result<Vec<u8>, MergeError>;

    fn page_count(&self, document: &[u8]) -> Result<usize, MergeError>;
}

/// PDF documents laid out with a [`Theme`]
#[derive(Debug, Clone, Default)]
pub struct PdfBackend {
    theme: Theme,
}

impl DocumentBackend for PdfBackend {
    fn render(&self, note_text: &str, timestamp: &str) -> Result<Vec<u8>, RenderError> {
        render::render_pdf(&self.theme, note_text, timestamp)
    }

    fn merge(&self, existing: &[u8], addition: &[u8]) -> Result<Vec<u8>, MergeError> {
        merge::merge_pdf(existing, addition)
    }

    fn page_count(&self, document: &[u8]) -> Result<usize, MergeError> {
        merge::page_count(document)
    }
}

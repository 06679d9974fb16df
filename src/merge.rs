//! Document Merger: graft the pages of a new PDF after an existing one
//!
//! The existing document keeps its object numbers, page tree and page
//! order untouched; the addition is renumbered above it and its pages are
//! appended to the existing root `Pages` node. Earliest submission first.

use lopdf::content::Content;
use lopdf::{Document, Object, ObjectId};
use thiserror::Error;

use crate::render::decode_win_ansi;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum MergeError {
    #[error("The {0} document is empty")]
    Empty(&'static str),

    #[error("The {which} document is malformed: {reason}")]
    Malformed { which: &'static str, reason: String },

    #[error("The {0} document has no pages")]
    NoPages(&'static str),

    #[error("Failed to serialize merged document: {0}")]
    Serialize(String),
}

impl From<MergeError> for String {
    fn from(e: MergeError) -> String {
        e.to_string()
    }
}

/// Page attributes a page may inherit from its ancestors in the page tree
const INHERITABLE: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

const MAX_TREE_DEPTH: usize = 64;

// ============================================================================
// LOADING
// ============================================================================

/// Parse a document, rejecting empty, unreadable, or page-less input
pub fn load(bytes: &[u8], which: &'static str) -> Result<Document, MergeError> {
    if bytes.is_empty() {
        return Err(MergeError::Empty(which));
    }
    let doc = Document::load_mem(bytes).map_err(|e| MergeError::Malformed {
        which,
        reason: e.to_string(),
    })?;
    if doc.get_pages().is_empty() {
        return Err(MergeError::NoPages(which));
    }
    Ok(doc)
}

fn root_pages_id(doc: &Document, which: &'static str) -> Result<ObjectId, MergeError> {
    let malformed = |reason: String| MergeError::Malformed { which, reason };

    let catalog_id = doc
        .trailer
        .get(b"Root")
        .and_then(Object::as_reference)
        .map_err(|e| malformed(format!("missing catalog: {}", e)))?;
    doc.get_dictionary(catalog_id)
        .and_then(|catalog| catalog.get(b"Pages"))
        .and_then(Object::as_reference)
        .map_err(|e| malformed(format!("missing page tree: {}", e)))
}

fn is_page_tree_node(object: &Object) -> bool {
    object
        .as_dict()
        .ok()
        .and_then(|d| d.get(b"Type").ok())
        .and_then(|t| t.as_name().ok())
        == Some(&b"Pages"[..])
}

/// Attributes a page only has through inheritance, resolved from its ancestors
fn inherited_attributes(doc: &Document, page_id: ObjectId) -> Vec<(Vec<u8>, Object)> {
    let mut found = Vec::new();
    let page = match doc.get_dictionary(page_id) {
        Ok(page) => page,
        Err(_) => return found,
    };

    for key in INHERITABLE {
        if page.has(key) {
            continue;
        }
        let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
        let mut depth = 0;
        while let Some(node_id) = parent {
            if depth >= MAX_TREE_DEPTH {
                break;
            }
            let node = match doc.get_dictionary(node_id) {
                Ok(node) => node,
                Err(_) => break,
            };
            if let Ok(value) = node.get(key) {
                found.push((key.to_vec(), value.clone()));
                break;
            }
            parent = node.get(b"Parent").and_then(Object::as_reference).ok();
            depth += 1;
        }
    }
    found
}

// ============================================================================
// MERGE
// ============================================================================

/// Produce one document holding the pages of `existing` followed by the
/// pages of `addition`. Neither input buffer is modified.
pub fn merge_pdf(existing: &[u8], addition: &[u8]) -> Result<Vec<u8>, MergeError> {
    let mut base = load(existing, "existing")?;
    let mut extra = load(addition, "addition")?;

    let base_root = root_pages_id(&base, "existing")?;
    let base_page_count = base.get_pages().len();

    extra.renumber_objects_with(base.max_id + 1);
    base.max_id = extra.max_id;

    let extra_catalog = extra.trailer.get(b"Root").and_then(Object::as_reference).ok();
    let extra_pages: Vec<ObjectId> = extra.get_pages().into_values().collect();
    let grafts: Vec<(ObjectId, Vec<(Vec<u8>, Object)>)> = extra_pages
        .iter()
        .map(|&id| (id, inherited_attributes(&extra, id)))
        .collect();

    // Everything except the addition's catalog and page tree nodes moves over
    for (id, object) in extra.objects {
        if Some(id) == extra_catalog || is_page_tree_node(&object) {
            continue;
        }
        base.objects.insert(id, object);
    }

    for (page_id, inherited) in grafts {
        let page = base
            .get_object_mut(page_id)
            .and_then(Object::as_dict_mut)
            .map_err(|e| MergeError::Malformed {
                which: "addition",
                reason: format!("page {:?}: {}", page_id, e),
            })?;
        for (key, value) in inherited {
            page.set(key, value);
        }
        page.set("Parent", base_root);
    }

    let root = base
        .get_object_mut(base_root)
        .and_then(Object::as_dict_mut)
        .map_err(|e| MergeError::Malformed {
            which: "existing",
            reason: format!("page tree root: {}", e),
        })?;
    let count = root.get(b"Count").and_then(Object::as_i64).unwrap_or(0);
    let kids = root
        .get_mut(b"Kids")
        .and_then(Object::as_array_mut)
        .map_err(|e| MergeError::Malformed {
            which: "existing",
            reason: format!("page tree kids: {}", e),
        })?;
    kids.extend(extra_pages.iter().map(|&id| Object::Reference(id)));
    root.set("Count", count + extra_pages.len() as i64);

    let mut merged = Vec::new();
    base.save_to(&mut merged)
        .map_err(|e| MergeError::Serialize(e.to_string()))?;

    log::debug!(
        "Merged {} + {} page(s) into {} bytes",
        base_page_count,
        extra_pages.len(),
        merged.len()
    );
    Ok(merged)
}

// ============================================================================
// INSPECTION
// ============================================================================

pub fn page_count(bytes: &[u8]) -> Result<usize, MergeError> {
    Ok(load(bytes, "stored")?.get_pages().len())
}

/// Text shown on each page, in page order
///
/// Used for verification and search; text pieces are joined by spaces.
pub fn page_texts(bytes: &[u8]) -> Result<Vec<String>, MergeError> {
    let doc = load(bytes, "stored")?;
    let mut texts = Vec::new();

    for page_id in doc.get_pages().into_values() {
        let raw = doc
            .get_page_content(page_id)
            .map_err(|e| MergeError::Malformed {
                which: "stored",
                reason: e.to_string(),
            })?;
        let content = Content::decode(&raw).map_err(|e| MergeError::Malformed {
            which: "stored",
            reason: e.to_string(),
        })?;

        let pieces: Vec<String> = content
            .operations
            .iter()
            .filter(|op| op.operator == "Tj")
            .filter_map(|op| match op.operands.first() {
                Some(Object::String(bytes, _)) => Some(decode_win_ansi(bytes)),
                _ => None,
            })
            .collect();
        texts.push(pieces.join(" "));
    }
    Ok(texts)
}

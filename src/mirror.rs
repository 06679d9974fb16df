//! Mirror Store: the plain-text transcript kept beside each consolidated
//! document, for in-app reading and search.
//!
//! Transcript shape:
//! ```text
//! **Created on: <when>**\n\n---\n\n<first note>
//! \n\n---\n\n**Added on: <when>**\n\n---\n\n<second note>
//! ...
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::vault::{self, Vault, VaultError};

const CREATED_PREFIX: &str = "**Created on: ";
const ADDED_SEPARATOR: &str = "\n\n---\n\n**Added on: ";
const HEADER_END: &str = "**\n\n---\n\n";

#[derive(Error, Debug)]
pub enum MirrorError {
    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error("Transcript {path} is not valid UTF-8")]
    NotUtf8 { path: PathBuf },
}

impl From<MirrorError> for String {
    fn from(e: MirrorError) -> String {
        e.to_string()
    }
}

/// First block of a transcript
pub fn created_block(timestamp: &str, note_text: &str) -> String {
    format!("{}{}{}{}", CREATED_PREFIX, timestamp, HEADER_END, note_text)
}

/// Every later block
pub fn added_block(timestamp: &str, note_text: &str) -> String {
    format!("{}{}{}{}", ADDED_SEPARATOR, timestamp, HEADER_END, note_text)
}

/// One submission as recorded in a transcript
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscriptEntry {
    /// "Created" or "Added"
    pub label: String,
    pub timestamp: String,
    pub text: String,
}

/// Split a transcript back into its submissions
pub fn parse_transcript(transcript: &str) -> Vec<TranscriptEntry> {
    let mut entries = Vec::new();

    for (i, segment) in transcript.split(ADDED_SEPARATOR).enumerate() {
        let (label, body) = if i == 0 {
            match segment.strip_prefix(CREATED_PREFIX) {
                Some(body) => ("Created", body),
                None => continue,
            }
        } else {
            ("Added", segment)
        };

        if let Some((timestamp, text)) = body.split_once(HEADER_END) {
            entries.push(TranscriptEntry {
                label: label.to_string(),
                timestamp: timestamp.to_string(),
                text: text.to_string(),
            });
        }
    }
    entries
}

#[derive(Debug, Clone)]
pub struct MirrorStore {
    vault: Vault,
}

impl MirrorStore {
    pub fn new(vault: Vault) -> Self {
        MirrorStore { vault }
    }

    pub fn load(&self, subject: &str, unit: u32) -> Result<Option<String>, MirrorError> {
        let path = self.vault.transcript_path(subject, unit)?;
        match vault::read_if_exists(&path)? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|_| MirrorError::NotUtf8 { path }),
            None => Ok(None),
        }
    }

    /// Append a timestamped block, or start the transcript with a "created" block
    pub fn append_or_create(
        &self,
        subject: &str,
        unit: u32,
        note_text: &str,
        timestamp: &str,
    ) -> Result<(), MirrorError> {
        let content = match self.load(subject, unit)? {
            Some(existing) => existing + &added_block(timestamp, note_text),
            None => created_block(timestamp, note_text),
        };
        self.write(subject, unit, &content)
    }

    /// Replace the whole transcript with a single "created" block
    pub fn overwrite(
        &self,
        subject: &str,
        unit: u32,
        note_text: &str,
        timestamp: &str,
    ) -> Result<(), MirrorError> {
        self.write(subject, unit, &created_block(timestamp, note_text))
    }

    fn write(&self, subject: &str, unit: u32, content: &str) -> Result<(), MirrorError> {
        let path = self.vault.transcript_path(subject, unit)?;
        vault::write_atomic(&path, content.as_bytes())?;
        Ok(())
    }
}

//! Remote sync: push a committed document to a GitHub repository
//!
//! Best effort. A push runs only after the local commit succeeded and its
//! result is reported, never acted on: nothing here touches local files
//! except to read the document being pushed.

use async_trait::async_trait;
use base64::Engine as _;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::Config;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{message}")]
    Rejected { status: u16, message: String },
}

impl From<SyncError> for String {
    fn from(e: SyncError) -> String {
        e.to_string()
    }
}

// ============================================================================
// DATA STRUCTURES
// ============================================================================

/// Result of a push, shaped for display
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SyncReport {
    pub ok: bool,
    pub message: String,
}

impl SyncReport {
    fn from_result(result: Result<(), SyncError>) -> Self {
        match result {
            Ok(()) => SyncReport {
                ok: true,
                message: "Synced to Cloud".to_string(),
            },
            Err(e) => SyncReport {
                ok: false,
                message: format!("Sync Error: {}", e),
            },
        }
    }
}

#[derive(Serialize, Debug)]
struct PutContents<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ContentsEntry {
    sha: String,
}

#[derive(Deserialize, Debug, Default)]
struct ApiMessage {
    #[serde(default)]
    message: Option<String>,
}

/// `Update <Subject> Unit <N>`
pub fn commit_message(subject: &str, unit: u32) -> String {
    format!("Update {} Unit {}", subject, unit)
}

// ============================================================================
// REMOTE SYNC
// ============================================================================

#[async_trait]
pub trait RemoteSync: Send + Sync {
    /// Push one local file; failures come back as a report, not an error
    async fn push(&self, local_path: &Path, commit_message: &str) -> SyncReport;
}

/// GitHub contents API client
pub struct GithubSync {
    client: Client,
    token: String,
    repo: String,
    branch: String,
    api_base: String,
    /// Remote paths are computed relative to this directory
    base_dir: PathBuf,
}

impl GithubSync {
    pub fn new(
        token: impl Into<String>,
        repo: impl Into<String>,
        branch: impl Into<String>,
        api_base: impl Into<String>,
        base_dir: impl Into<PathBuf>,
    ) -> Self {
        GithubSync {
            client: Client::new(),
            token: token.into(),
            repo: repo.into(),
            branch: branch.into(),
            api_base: api_base.into(),
            base_dir: base_dir.into(),
        }
    }

    /// `None` unless both token and repository are configured
    pub fn from_config(config: &Config) -> Option<Self> {
        if !config.sync.is_enabled() {
            return None;
        }
        let base_dir = config
            .root_dir
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Some(GithubSync::new(
            config.sync.token.clone().unwrap_or_default(),
            config.sync.repo.clone().unwrap_or_default(),
            config.sync.branch.clone(),
            config.sync.api_base.clone(),
            base_dir,
        ))
    }

    /// Repository path for a local file: relative to the base directory,
    /// or just the file name when the file lives elsewhere
    pub fn remote_path(&self, local_path: &Path) -> String {
        match local_path.strip_prefix(&self.base_dir) {
            Ok(rel) if !rel.as_os_str().is_empty() => rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/"),
            _ => local_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
        }
    }

    fn contents_url(&self, remote_path: &str) -> String {
        format!(
            "{}/repos/{}/contents/{}",
            self.api_base.trim_end_matches('/'),
            self.repo,
            remote_path
        )
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("Authorization", format!("token {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "unit-sync")
    }

    /// Blob sha of the remote file, if it exists on the branch
    async fn current_sha(&self, url: &str) -> Result<Option<String>, SyncError> {
        let res = self
            .request(self.client.get(url))
            .query(&[("ref", self.branch.as_str())])
            .send()
            .await?;

        if res.status() != StatusCode::OK {
            return Ok(None);
        }
        let entry: ContentsEntry = res.json().await?;
        Ok(Some(entry.sha))
    }

    async fn try_push(&self, local_path: &Path, commit_message: &str) -> Result<(), SyncError> {
        let bytes = tokio::fs::read(local_path)
            .await
            .map_err(|source| SyncError::Read {
                path: local_path.to_path_buf(),
                source,
            })?;

        let remote_path = self.remote_path(local_path);
        let url = self.contents_url(&remote_path);
        let sha = self.current_sha(&url).await?;
        log::debug!(
            "Pushing {} to {}:{} ({})",
            local_path.display(),
            self.repo,
            remote_path,
            if sha.is_some() { "update" } else { "create" }
        );

        let payload = PutContents {
            message: commit_message,
            content: base64::engine::general_purpose::STANDARD.encode(&bytes),
            branch: &self.branch,
            sha,
        };
        let res = self
            .request(self.client.put(&url))
            .json(&payload)
            .send()
            .await?;

        let status = res.status();
        if status == StatusCode::OK || status == StatusCode::CREATED {
            return Ok(());
        }
        let body: ApiMessage = res.json().await.unwrap_or_default();
        Err(SyncError::Rejected {
            status: status.as_u16(),
            message: body.message.unwrap_or_else(|| status.to_string()),
        })
    }
}

#[async_trait]
impl RemoteSync for GithubSync {
    async fn push(&self, local_path: &Path, commit_message: &str) -> SyncReport {
        let report = SyncReport::from_result(self.try_push(local_path, commit_message).await);
        if report.ok {
            log::info!("Synced {} ({})", local_path.display(), commit_message);
        } else {
            log::warn!("{} for {}", report.message, local_path.display());
        }
        report
    }
}

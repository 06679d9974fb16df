//! Configuration for Unit-Sync.
//!
//! Resolution order:
//! ```text
//! --config <path>  ──►  $UNIT_SYNC_CONFIG  ──►  <config_dir>/unit-sync/config.toml  ──►  defaults
//!                                     │
//!                                     ▼
//!                       environment overrides (UNIT_SYNC_ROOT, GITHUB_TOKEN, ...)
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_ROOT_DIR: &str = "My_Study_Notes";
pub const DEFAULT_MAX_UNITS: u32 = 10;
pub const DEFAULT_DOCUMENT_EXTENSION: &str = "pdf";
pub const DEFAULT_CORTEX_ENDPOINT: &str = "http://127.0.0.1:11434";
pub const DEFAULT_CORTEX_MODEL: &str = "llama3";
pub const DEFAULT_GITHUB_API: &str = "https://api.github.com";

const UNIT_CEILING: u32 = 999;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<ConfigError> for String {
    fn from(e: ConfigError) -> String {
        e.to_string()
    }
}

/// Remote sync settings. Sync is active only when both token and repo are set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    pub token: Option<String>,
    /// `owner/repository`
    pub repo: Option<String>,
    pub branch: String,
    pub api_base: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            token: None,
            repo: None,
            branch: "main".to_string(),
            api_base: DEFAULT_GITHUB_API.to_string(),
        }
    }
}

impl SyncConfig {
    pub fn is_enabled(&self) -> bool {
        matches!((&self.token, &self.repo), (Some(t), Some(r)) if !t.is_empty() && !r.is_empty())
    }
}

/// Local text-generation endpoint used for Select-to-Define.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CortexConfig {
    pub endpoint: String,
    pub model: String,
}

impl Default for CortexConfig {
    fn default() -> Self {
        CortexConfig {
            endpoint: DEFAULT_CORTEX_ENDPOINT.to_string(),
            model: DEFAULT_CORTEX_MODEL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Directory holding one folder per Subject
    pub root_dir: PathBuf,
    /// Highest unit number accepted (units are 1..=max_units)
    pub max_units: u32,
    /// Extension of the consolidated document (`Unit_<N>.<ext>`)
    pub document_extension: String,
    pub sync: SyncConfig,
    pub cortex: CortexConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            root_dir: PathBuf::from(DEFAULT_ROOT_DIR),
            max_units: DEFAULT_MAX_UNITS,
            document_extension: DEFAULT_DOCUMENT_EXTENSION.to_string(),
            sync: SyncConfig::default(),
            cortex: CortexConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration following the resolution order in the module docs,
    /// then apply environment overrides and validate.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("UNIT_SYNC_CONFIG").map(PathBuf::from))
            .or_else(|| {
                dirs::config_dir()
                    .map(|d| d.join("unit-sync").join("config.toml"))
                    .filter(|p| p.exists())
            });

        let mut config = match path {
            Some(p) => {
                log::debug!("Loading config from {}", p.display());
                Self::load_from_path(&p)?
            }
            None => Config::default(),
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml_str(&raw).map_err(|reason| ConfigError::Parse {
            path: path.to_path_buf(),
            reason,
        })
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, String> {
        toml::from_str(raw).map_err(|e| e.to_string())
    }

    /// Apply overrides from a key lookup (the process environment in production).
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(root) = get("UNIT_SYNC_ROOT") {
            self.root_dir = PathBuf::from(root);
        }
        if let Some(token) = get("GITHUB_TOKEN") {
            self.sync.token = Some(token);
        }
        if let Some(repo) = get("GITHUB_REPO") {
            self.sync.repo = Some(repo);
        }
        if let Some(branch) = get("GITHUB_BRANCH") {
            self.sync.branch = branch;
        }
        if let Some(url) = get("UNIT_SYNC_CORTEX_URL") {
            self.cortex.endpoint = url;
        }
        if let Some(model) = get("UNIT_SYNC_CORTEX_MODEL") {
            self.cortex.model = model;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_units == 0 || self.max_units > UNIT_CEILING {
            return Err(ConfigError::Invalid(format!(
                "max_units must be between 1 and {}, got {}",
                UNIT_CEILING, self.max_units
            )));
        }

        let ext = self.document_extension.as_str();
        if ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ConfigError::Invalid(format!(
                "document_extension must be alphanumeric, got '{}'",
                ext
            )));
        }
        // Collides with the transcript and backup naming
        if ext.eq_ignore_ascii_case("md") || ext.eq_ignore_ascii_case("bak") {
            return Err(ConfigError::Invalid(format!(
                "document_extension '{}' is reserved",
                ext
            )));
        }

        if self.root_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("root_dir must not be empty".to_string()));
        }

        Ok(())
    }
}

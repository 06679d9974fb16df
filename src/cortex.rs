//! Cortex: Select-to-Define against a local Ollama instance
//!
//! ```text
//! selected term ──► trim / length check ──► POST /api/generate ──► definition
//! ```

use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::CortexConfig;

const MIN_TERM_CHARS: usize = 2;
const MAX_TERM_CHARS: usize = 120;

pub const NO_DEFINITION: &str = "No definition available";

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum CortexError {
    #[error("Select between 2 and 120 characters to define (got {0})")]
    InvalidTerm(usize),

    #[error("Failed to reach Ollama: {0}. Is it running?")]
    Unreachable(#[source] reqwest::Error),

    #[error("Ollama error: {0}")]
    Status(reqwest::StatusCode),

    #[error("Failed to parse response: {0}")]
    Parse(#[source] reqwest::Error),
}

impl From<CortexError> for String {
    fn from(e: CortexError) -> String {
        e.to_string()
    }
}

// ============================================================================
// DATA STRUCTURES
// ============================================================================

#[derive(Serialize, Deserialize, Debug)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
}

#[derive(Serialize, Deserialize, Debug)]
struct OllamaResponse {
    response: String,
    #[serde(default)]
    done: bool,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

#[derive(Deserialize)]
struct ModelInfo {
    name: String,
}

pub fn definition_prompt(term: &str) -> String {
    format!("Define briefly in 1-2 simple sentences for a student: {}", term)
}

/// Trimmed term, if its length is within selection limits
pub fn normalize_term(raw: &str) -> Result<&str, CortexError> {
    let term = raw.trim();
    let chars = term.chars().count();
    if !(MIN_TERM_CHARS..=MAX_TERM_CHARS).contains(&chars) {
        return Err(CortexError::InvalidTerm(chars));
    }
    Ok(term)
}

// ============================================================================
// CORTEX
// ============================================================================

pub struct Cortex {
    client: Client,
    endpoint: String,
    model: String,
}

impl Cortex {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Cortex {
            client: Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }

    pub fn from_config(config: &CortexConfig) -> Self {
        Cortex::new(config.endpoint.clone(), config.model.clone())
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Short student-level definition of `term`
    pub async fn define(&self, term: &str) -> Result<String, CortexError> {
        let term = normalize_term(term)?;
        let request = OllamaRequest {
            model: self.model.clone(),
            prompt: definition_prompt(term),
            stream: false,
        };

        let res = self
            .client
            .post(format!("{}/api/generate", self.endpoint))
            .json(&request)
            .send()
            .await
            .map_err(CortexError::Unreachable)?;

        if !res.status().is_success() {
            return Err(CortexError::Status(res.status()));
        }

        let body: OllamaResponse = res.json().await.map_err(CortexError::Parse)?;
        let definition = body.response.trim();
        log::debug!("Defined '{}' with {} (done: {})", term, self.model, body.done);

        if definition.is_empty() {
            Ok(NO_DEFINITION.to_string())
        } else {
            Ok(definition.to_string())
        }
    }

    /// Check if Ollama is running and responsive
    pub async fn check_status(&self) -> Result<String, String> {
        match self.client.get(format!("{}/api/tags", self.endpoint)).send().await {
            Ok(r) if r.status().is_success() => Ok("Cortex Online".to_string()),
            Ok(r) => Err(format!("Cortex returned status: {}", r.status())),
            Err(e) => Err(format!("Cortex Offline: {}. Run: ollama serve", e)),
        }
    }

    /// Models available on the local instance
    pub async fn list_models(&self) -> Result<Vec<String>, CortexError> {
        let res = self
            .client
            .get(format!("{}/api/tags", self.endpoint))
            .send()
            .await
            .map_err(CortexError::Unreachable)?;
        if !res.status().is_success() {
            return Err(CortexError::Status(res.status()));
        }
        let tags: TagsResponse = res.json().await.map_err(CortexError::Parse)?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_term() {
        assert_eq!(normalize_term("  entropy \n").unwrap(), "entropy");
        assert!(matches!(normalize_term(" x "), Err(CortexError::InvalidTerm(1))));
        assert!(matches!(normalize_term(""), Err(CortexError::InvalidTerm(0))));
        let long = "a".repeat(121);
        assert!(matches!(normalize_term(&long), Err(CortexError::InvalidTerm(121))));
        assert!(normalize_term(&"é".repeat(120)).is_ok());
    }

    #[test]
    fn test_definition_prompt() {
        assert_eq!(
            definition_prompt("osmosis"),
            "Define briefly in 1-2 simple sentences for a student: osmosis"
        );
    }

    #[test]
    fn test_endpoint_trailing_slash_trimmed() {
        let cortex = Cortex::new("http://localhost:11434/", "llama3");
        assert_eq!(cortex.endpoint, "http://localhost:11434");
        assert_eq!(cortex.model(), "llama3");
    }
}

//! Command layer, remote sync, and Cortex against mock servers.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::Engine as _;
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;
use unit_sync::commands::{self, AppState};
use unit_sync::{
    Config, Cortex, CortexError, FixedClock, GithubSync, RemoteSync, Status, SubmitRequest,
    SyncReport, WriteMode,
};
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const NOW: &str = "June 12, 2026 at 03:30 PM";

/// Records every push and answers with a fixed report
struct RecordingSync {
    pushes: Arc<Mutex<Vec<(PathBuf, String)>>>,
    ok: bool,
}

#[async_trait]
impl RemoteSync for RecordingSync {
    async fn push(&self, local_path: &Path, commit_message: &str) -> SyncReport {
        self.pushes
            .lock()
            .unwrap()
            .push((local_path.to_path_buf(), commit_message.to_string()));
        SyncReport {
            ok: self.ok,
            message: if self.ok {
                "Synced to Cloud".to_string()
            } else {
                "Sync Error: offline".to_string()
            },
        }
    }
}

fn state(tmp: &TempDir) -> AppState {
    let config = Config {
        root_dir: tmp.path().join("My_Study_Notes"),
        ..Config::default()
    };
    AppState::new(config).with_clock(FixedClock(NOW.to_string()))
}

// ============================================================================
// COMMAND LAYER
// ============================================================================

#[tokio::test]
async fn test_subject_lifecycle() {
    let tmp = TempDir::new().unwrap();
    let state = state(&tmp);

    assert_eq!(commands::create_subject(&state, "Linear Algebra").unwrap(), "Linear_Algebra");
    commands::create_subject(&state, "Biology").unwrap();
    assert!(commands::create_subject(&state, "Biology").is_err());
    assert!(commands::create_subject(&state, "../..").is_err());
    assert_eq!(
        commands::list_subjects(&state).unwrap(),
        vec!["Biology".to_string(), "Linear_Algebra".to_string()]
    );

    assert!(commands::rename_subject(&state, "Biology", "Linear Algebra").is_err());
    assert_eq!(commands::rename_subject(&state, "Biology", "Bio").unwrap(), "Bio");

    commands::delete_subject(&state, "Bio").unwrap();
    assert_eq!(commands::list_subjects(&state).unwrap(), vec!["Linear_Algebra".to_string()]);
}

#[tokio::test]
async fn test_submit_syncs_after_commit() {
    let tmp = TempDir::new().unwrap();
    let pushes = Arc::new(Mutex::new(Vec::new()));
    let state = state(&tmp).with_sync(Some(Box::new(RecordingSync {
        pushes: Arc::clone(&pushes),
        ok: true,
    })));
    commands::create_subject(&state, "Math").unwrap();

    let response = commands::submit_note(
        &state,
        SubmitRequest::new("Math", 2, "# Limits", WriteMode::Append),
    )
    .await
    .unwrap();

    assert_eq!(response.outcome.status, Status::Created);
    assert_eq!(response.message, "Created Math Unit 2");
    assert_eq!(response.sync.unwrap().message, "Synced to Cloud");
    assert_eq!(
        pushes.lock().unwrap().clone(),
        vec![(response.outcome.path.clone(), "Update Math Unit 2".to_string())]
    );
}

#[tokio::test]
async fn test_sync_failure_keeps_local_commit() {
    let tmp = TempDir::new().unwrap();
    let state = state(&tmp).with_sync(Some(Box::new(RecordingSync {
        pushes: Arc::new(Mutex::new(Vec::new())),
        ok: false,
    })));
    commands::create_subject(&state, "Math").unwrap();

    let response = commands::submit_note(
        &state,
        SubmitRequest::new("Math", 1, "note", WriteMode::Append),
    )
    .await
    .unwrap();

    let report = response.sync.unwrap();
    assert!(!report.ok);
    assert!(state.vault.exists_unit_doc("Math", 1));
    assert_eq!(commands::list_units(&state, "Math").unwrap().len(), 1);
}

#[tokio::test]
async fn test_failed_submit_skips_sync() {
    let tmp = TempDir::new().unwrap();
    let pushes = Arc::new(Mutex::new(Vec::new()));
    let state = state(&tmp).with_sync(Some(Box::new(RecordingSync {
        pushes: Arc::clone(&pushes),
        ok: true,
    })));
    commands::create_subject(&state, "Math").unwrap();

    let err = commands::submit_note(&state, SubmitRequest::new("Math", 1, "  ", WriteMode::Append))
        .await
        .unwrap_err();
    assert!(err.starts_with("rejected"));
    assert!(pushes.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_units_undo_read_and_delete() {
    let tmp = TempDir::new().unwrap();
    let state = state(&tmp);
    commands::create_subject(&state, "Math").unwrap();

    for text in ["first", "second"] {
        commands::submit_note(&state, SubmitRequest::new("Math", 3, text, WriteMode::Append))
            .await
            .unwrap();
    }

    let units = commands::list_units(&state, "Math").unwrap();
    assert_eq!(units.iter().map(|u| u.unit).collect::<Vec<_>>(), vec![3]);
    assert!(units[0].size.ends_with(" KB"));
    assert_eq!(commands::list_readable_units(&state, "Math").unwrap().len(), 1);

    let transcript = commands::read_transcript(&state, "Math", 3).unwrap().unwrap();
    assert!(transcript.starts_with(&format!("**Created on: {}**", NOW)));
    assert!(transcript.ends_with("**Added on: June 12, 2026 at 03:30 PM**\n\n---\n\nsecond"));

    assert_eq!(commands::undo_unit(&state, "Math", 3).unwrap().status, Status::Undone);
    assert_eq!(commands::undo_unit(&state, "Math", 1).unwrap().status, Status::NoBackupAvailable);

    assert!(commands::delete_unit(&state, "Math", 3).unwrap());
    assert!(!commands::delete_unit(&state, "Math", 3).unwrap());
    assert_eq!(commands::read_transcript(&state, "Math", 3).unwrap(), None);
    assert!(commands::delete_unit(&state, "Math", 42).is_err());
}

// ============================================================================
// GITHUB SYNC
// ============================================================================

fn unit_file(tmp: &TempDir) -> (PathBuf, Vec<u8>) {
    let dir = tmp.path().join("My_Study_Notes").join("Math");
    std::fs::create_dir_all(&dir).unwrap();
    let file = dir.join("Unit_1.pdf");
    let bytes = b"%PDF-1.5 stand-in".to_vec();
    std::fs::write(&file, &bytes).unwrap();
    (file, bytes)
}

fn github(server: &MockServer, tmp: &TempDir) -> GithubSync {
    GithubSync::new("secret", "me/notes", "main", server.uri(), tmp.path())
}

const CONTENTS: &str = "/repos/me/notes/contents/My_Study_Notes/Math/Unit_1.pdf";

#[tokio::test]
async fn test_github_creates_new_file() {
    let server = MockServer::start().await;
    let tmp = TempDir::new().unwrap();
    let (file, bytes) = unit_file(&tmp);

    Mock::given(method("GET"))
        .and(path(CONTENTS))
        .and(query_param("ref", "main"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "Not Found"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(CONTENTS))
        .and(body_partial_json(json!({
            "message": "Update Math Unit 1",
            "branch": "main",
            "content": base64::engine::general_purpose::STANDARD.encode(&bytes),
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let report = github(&server, &tmp).push(&file, "Update Math Unit 1").await;
    assert_eq!(
        report,
        SyncReport {
            ok: true,
            message: "Synced to Cloud".to_string()
        }
    );
}

#[tokio::test]
async fn test_github_updates_existing_file_with_sha() {
    let server = MockServer::start().await;
    let tmp = TempDir::new().unwrap();
    let (file, _) = unit_file(&tmp);

    Mock::given(method("GET"))
        .and(path(CONTENTS))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"sha": "abc123"})))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(CONTENTS))
        .and(body_partial_json(json!({"sha": "abc123"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    assert!(github(&server, &tmp).push(&file, "Update Math Unit 1").await.ok);
}

#[tokio::test]
async fn test_github_rejection_reports_api_message() {
    let server = MockServer::start().await;
    let tmp = TempDir::new().unwrap();
    let (file, _) = unit_file(&tmp);

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"message": "Bad credentials"})),
        )
        .mount(&server)
        .await;

    let report = github(&server, &tmp).push(&file, "Update Math Unit 1").await;
    assert!(!report.ok);
    assert_eq!(report.message, "Sync Error: Bad credentials");
}

#[tokio::test]
async fn test_github_missing_local_file() {
    let server = MockServer::start().await;
    let tmp = TempDir::new().unwrap();

    let report = github(&server, &tmp)
        .push(&tmp.path().join("nope.pdf"), "Update Math Unit 1")
        .await;
    assert!(!report.ok);
    assert!(report.message.starts_with("Sync Error: Failed to read"));
}

// ============================================================================
// CORTEX
// ============================================================================

#[tokio::test]
async fn test_define_term() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(json!({
            "model": "llama3",
            "stream": false,
            "prompt": "Define briefly in 1-2 simple sentences for a student: osmosis",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": "  Osmosis is the movement of water across a membrane.\n",
            "done": true,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let cortex = Cortex::new(server.uri(), "llama3");
    assert_eq!(
        cortex.define("  osmosis ").await.unwrap(),
        "Osmosis is the movement of water across a membrane."
    );
}

#[tokio::test]
async fn test_define_empty_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"response": "", "done": true})))
        .mount(&server)
        .await;

    let cortex = Cortex::new(server.uri(), "llama3");
    assert_eq!(cortex.define("entropy").await.unwrap(), "No definition available");
}

#[tokio::test]
async fn test_define_rejects_bad_terms_without_calling_model() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let cortex = Cortex::new(server.uri(), "llama3");
    assert!(matches!(cortex.define("a").await, Err(CortexError::InvalidTerm(1))));
    assert!(matches!(
        cortex.define(&"x".repeat(200)).await,
        Err(CortexError::InvalidTerm(200))
    ));
}

#[tokio::test]
async fn test_define_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let cortex = Cortex::new(server.uri(), "llama3");
    assert!(matches!(cortex.define("entropy").await, Err(CortexError::Status(_))));
}

#[tokio::test]
async fn test_cortex_status_and_models() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{"name": "llama3:latest"}, {"name": "mistral:7b"}]
        })))
        .mount(&server)
        .await;

    let cortex = Cortex::new(server.uri(), "llama3");
    assert_eq!(cortex.check_status().await.unwrap(), "Cortex Online");
    assert_eq!(
        cortex.list_models().await.unwrap(),
        vec!["llama3:latest".to_string(), "mistral:7b".to_string()]
    );
}

#[tokio::test]
async fn test_cortex_offline() {
    let server = MockServer::start().await;
    let uri = server.uri();
    drop(server);

    let cortex = Cortex::new(uri, "llama3");
    assert!(cortex.check_status().await.unwrap_err().starts_with("Cortex Offline"));
}

//! Deployment history tests

mod common;

use common::{Harness, COMMIT};

use launchpad::deploy::history::{DeploymentStatus, MAX_HISTORY};

#[tokio::test]
async fn test_history_keeps_newest_ten() {
    let harness = Harness::new();
    harness.write_app("api", &harness.app_yaml("api", "true"));
    let state = harness.state().await;

    let mut ids = Vec::new();
    for _ in 0..11 {
        let result = state.dispatcher.deploy("api").await.unwrap();
        assert!(result.success, "{:?}", result.error);
        ids.push(result.deployment_id);
    }

    let history = state.dispatcher.deployer().history().history("api").await.unwrap();
    assert_eq!(history.history.len(), MAX_HISTORY);

    // Newest first, the very first attempt dropped
    let expected: Vec<String> = ids.iter().rev().take(MAX_HISTORY).cloned().collect();
    let recorded: Vec<String> = history.history.iter().map(|r| r.id.clone()).collect();
    assert_eq!(recorded, expected);
    assert_eq!(history.current.as_deref(), ids.last().map(String::as_str));
    assert!(!recorded.contains(&ids[0]));
}

#[tokio::test]
async fn test_failed_build_records_one_failure() {
    let harness = Harness::new();
    harness.write_app("api", &harness.app_yaml("api", "echo compiling && exit 1"));
    let state = harness.state().await;

    let result = state.dispatcher.deploy("api").await.unwrap();
    assert!(!result.success);
    let error = result.error.clone().unwrap();
    assert!(error.starts_with("build phase failed"), "{}", error);
    assert_eq!(result.commit.as_deref(), Some(COMMIT));

    let history = state.dispatcher.deployer().history().history("api").await.unwrap();
    assert_eq!(history.history.len(), 1);
    let record = &history.history[0];
    assert_eq!(record.status, DeploymentStatus::Failed);
    assert_eq!(record.id, result.deployment_id);
    assert_eq!(record.commit.as_deref(), Some(COMMIT));
    assert_eq!(record.error.as_deref(), Some(error.as_str()));
    assert_eq!(record.duration_ms, result.duration_ms);

    // Nothing was (re)started
    assert!(harness.supervisor.starts().is_empty());
}

#[tokio::test]
async fn test_attempt_log_captures_build_output() {
    let harness = Harness::new();
    harness.write_app("api", &harness.app_yaml("api", "echo hello-from-build"));
    let state = harness.state().await;

    let result = state.dispatcher.deploy("api").await.unwrap();
    assert!(result.success, "{:?}", result.error);

    let log_file = harness
        .layout
        .deployment_logs_dir()
        .path()
        .join("api")
        .join(format!("{}.log", result.deployment_id));
    let log = std::fs::read_to_string(log_file).unwrap();
    assert!(log.contains("[stdout] hello-from-build"), "{}", log);
    assert!(log.contains("Deployment succeeded"));
}

#[tokio::test]
async fn test_history_document_is_keyed_by_target() {
    let harness = Harness::new();
    harness.write_app("api", &harness.app_yaml("api", "true"));
    harness.write_app("web", &harness.app_yaml("web", "false"));
    let state = harness.state().await;

    assert!(state.dispatcher.deploy("api").await.unwrap().success);
    assert!(!state.dispatcher.deploy("web").await.unwrap().success);

    let raw = std::fs::read_to_string(harness.layout.deployments_file().path()).unwrap();
    let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(doc["api"]["history"][0]["status"], "success");
    assert_eq!(doc["web"]["history"][0]["status"], "failed");
    assert!(doc["api"]["history"][0]["duration"].is_u64());
    assert_eq!(doc["api"]["current"], doc["api"]["history"][0]["id"]);
}

//! Deployment engine tests: applications, engines and modules end to end

mod common;

use std::collections::BTreeMap;

use axum::{routing::get, Router};
use tokio::net::TcpListener;

use common::{Call, Harness, COMMIT};

use launchpad::deploy::health::{HealthRecord, HealthStatus};
use launchpad::deploy::history::DeploymentStatus;
use launchpad::ports::state::PortState;

const FAST_PROBES: &str = "deployment:\n  health_check_retries: 1\n";

fn engine_yaml(harness: &Harness, ports: &[u16]) -> String {
    let ports: Vec<String> = ports.iter().map(u16::to_string).collect();
    format!(
        r#"
name: arcade
server:
  repo: git@github.com:org/arcade.git
  path: {path}
  ports: [{ports}]
  build:
    command: "true"
  start:
    command: node server.js
  env:
    REGION: eu
modules:
  chat:
    subpath: modules/chat
    build:
      command: "printf %s $REGION > region.txt"
  leaderboard:
    repo: git@github.com:org/leaderboard.git
    path: {leaderboard}
    build:
      command: "true"
    start:
      command: node index.js
"#,
        path = harness.srv("arcade").display(),
        ports = ports.join(", "),
        leaderboard = harness.srv("leaderboard").display(),
    )
}

fn port_state(harness: &Harness) -> PortState {
    let raw = std::fs::read_to_string(harness.layout.ports_file().path()).unwrap();
    serde_json::from_str(&raw).unwrap()
}

fn health(harness: &Harness, target: &str) -> Option<HealthRecord> {
    let raw = std::fs::read_to_string(harness.layout.health_file().path()).ok()?;
    let mut doc: BTreeMap<String, HealthRecord> = serde_json::from_str(&raw).unwrap();
    doc.remove(target)
}

/// Puts a stand-in `npm` on a bin directory that records its arguments
#[cfg(unix)]
fn fake_npm(harness: &Harness) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let bin = harness.dir.path().join("bin");
    std::fs::create_dir_all(&bin).unwrap();
    let npm = bin.join("npm");
    std::fs::write(&npm, "#!/bin/sh\nsleep 0.05\necho \"npm $*\" >> npm-calls.txt\n").unwrap();
    std::fs::set_permissions(&npm, std::fs::Permissions::from_mode(0o755)).unwrap();
    bin
}

#[cfg(unix)]
#[tokio::test]
async fn test_app_deploy_allocates_port_and_starts_process() {
    let harness = Harness::new();
    let bin = fake_npm(&harness);
    // No build command: the npm runtime default applies
    let descriptor = format!(
        "{}env:\n  PATH: \"{}:${{PATH}}\"\n",
        harness.app_yaml("api", ""),
        bin.display()
    );
    harness.write_app("api", &descriptor);
    let state = harness.state().await;

    let result = state.dispatcher.deploy("api").await.unwrap();
    assert!(result.success, "{:?}", result.error);
    assert!(result.duration_ms > 0);
    let npm_calls = std::fs::read_to_string(harness.srv("api").join("npm-calls.txt")).unwrap();
    assert_eq!(npm_calls.trim(), "npm ci");
    assert_eq!(result.target, "api");
    assert_eq!(result.port, Some(3001));
    assert_eq!(result.commit.as_deref(), Some(COMMIT));

    assert_eq!(port_state(&harness).allocations.get("api"), Some(&3001));

    let calls = harness.supervisor.calls();
    assert_eq!(calls.len(), 4, "{:?}", calls);
    assert_eq!(calls[0], Call::Stop("api".to_string()));
    assert_eq!(calls[1], Call::Delete("api".to_string()));
    match &calls[2] {
        Call::Start { name, command, cwd, env } => {
            assert_eq!(name, "api");
            assert_eq!(command, "node server.js");
            assert_eq!(cwd, &harness.srv("api"));
            assert_eq!(env.get("PORT").map(String::as_str), Some("3001"));
        }
        other => panic!("expected a start, got {:?}", other),
    }
    assert_eq!(calls[3], Call::Persist);

    let history = state.dispatcher.deployer().history().history("api").await.unwrap();
    assert_eq!(history.history.len(), 1);
    let record = &history.history[0];
    assert_eq!(record.status, DeploymentStatus::Success);
    assert_eq!(record.commit.as_deref(), Some(COMMIT));
    assert_eq!(record.duration_ms, result.duration_ms);
    assert!(record.error.is_none());
}

#[tokio::test]
async fn test_redeploy_keeps_port() {
    let harness = Harness::new();
    harness.write_app("api", &harness.app_yaml("api", "true"));
    harness.write_app("web", &harness.app_yaml("web", "true"));
    let state = harness.state().await;

    assert_eq!(state.dispatcher.deploy("api").await.unwrap().port, Some(3001));
    assert_eq!(state.dispatcher.deploy("web").await.unwrap().port, Some(3002));
    assert_eq!(state.dispatcher.deploy("api").await.unwrap().port, Some(3001));
}

#[tokio::test]
async fn test_script_mode_runs_deploy_script_with_port() {
    let harness = Harness::new();
    let checkout = harness.srv("site");
    std::fs::create_dir_all(&checkout).unwrap();
    std::fs::write(
        checkout.join("deploy.sh"),
        "#!/usr/bin/env bash\nprintf %s \"$PORT\" > deployed-port.txt\n",
    )
    .unwrap();
    harness.write_app(
        "site",
        &format!(
            "name: site\nrepo: git@github.com:org/site.git\npath: {}\nport: 4100\ndeploy_mode: script\nbuild:\n  command: \"true\"\n",
            checkout.display()
        ),
    );
    let state = harness.state().await;

    let result = state.dispatcher.deploy("site").await.unwrap();
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.port, Some(4100));
    assert_eq!(
        std::fs::read_to_string(checkout.join("deployed-port.txt")).unwrap(),
        "4100"
    );
    assert!(harness.supervisor.calls().is_empty());
}

#[tokio::test]
async fn test_missing_deploy_script_fails_activation() {
    let harness = Harness::new();
    harness.write_app(
        "site",
        &format!(
            "name: site\nrepo: git@github.com:org/site.git\npath: {}\ndeploy_mode: script\nbuild:\n  command: \"true\"\n",
            harness.srv("site").display()
        ),
    );
    let state = harness.state().await;

    let result = state.dispatcher.deploy("site").await.unwrap();
    assert!(!result.success);
    let error = result.error.unwrap();
    assert!(error.starts_with("activate phase failed"), "{}", error);
    assert!(error.contains("deploy.sh"), "{}", error);
}

#[tokio::test]
async fn test_engine_deploy_registers_ports_and_probes_health() {
    // Stand-in for the engine process
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let app = Router::new().route("/", get(|| async { "ok" }));
        let _ = axum::serve(listener, app).await;
    });

    let harness = Harness::new();
    harness.write_global(FAST_PROBES);
    harness.write_engine("arcade", &engine_yaml(&harness, &[port]));
    let state = harness.state().await;

    let result = state.dispatcher.deploy("arcade").await.unwrap();
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.target, "arcade-engine");
    assert_eq!(result.port, Some(port));

    assert_eq!(port_state(&harness).engines.get("arcade"), Some(&vec![port]));

    let starts = harness.supervisor.starts();
    assert_eq!(starts.len(), 1);
    match &starts[0] {
        Call::Start { name, env, .. } => {
            assert_eq!(name, "arcade");
            assert_eq!(env.get("PORT"), Some(&port.to_string()));
            assert_eq!(env.get("REGION").map(String::as_str), Some("eu"));
        }
        other => panic!("expected a start, got {:?}", other),
    }

    let record = health(&harness, "arcade-engine").unwrap();
    assert_eq!(record.status, HealthStatus::Healthy);
    assert_eq!(record.attempts, 1);
    assert_eq!(record.deployment_id, result.deployment_id);
}

#[tokio::test]
async fn test_engine_module_restarts_engine_process() {
    let harness = Harness::new();
    harness.write_engine("arcade", &engine_yaml(&harness, &[]));
    std::fs::create_dir_all(harness.srv("arcade").join("modules/chat")).unwrap();
    let state = harness.state().await;

    let result = state.dispatcher.deploy("arcade:chat").await.unwrap();
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.target, "arcade-chat");
    assert_eq!(result.port, None);

    // Built inside the engine checkout with the merged environment
    let built = harness.srv("arcade").join("modules/chat/region.txt");
    assert_eq!(std::fs::read_to_string(built).unwrap(), "eu");
    assert_eq!(harness.source.synced()[0].0, harness.srv("arcade"));

    assert_eq!(
        harness.supervisor.calls(),
        vec![Call::Restart("arcade".to_string())]
    );

    let history = state.dispatcher.deployer().history().history("arcade-chat").await.unwrap();
    assert_eq!(history.history.len(), 1);
}

#[tokio::test]
async fn test_module_with_own_repo_allocates_from_games_range() {
    let harness = Harness::new();
    harness.write_global(FAST_PROBES);
    harness.write_engine("arcade", &engine_yaml(&harness, &[7000, 7001]));
    let state = harness.state().await;

    let result = state.dispatcher.deploy("leaderboard").await.unwrap();
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.target, "arcade-leaderboard");
    // 7000 and 7001 belong to the engine
    assert_eq!(result.port, Some(7002));
    assert_eq!(
        port_state(&harness).allocations.get("arcade-leaderboard"),
        Some(&7002)
    );

    assert_eq!(harness.source.synced()[0].0, harness.srv("leaderboard"));
    let starts = harness.supervisor.starts();
    match &starts[0] {
        Call::Start { name, cwd, .. } => {
            assert_eq!(name, "arcade-leaderboard");
            assert_eq!(cwd, &harness.srv("leaderboard"));
        }
        other => panic!("expected a start, got {:?}", other),
    }

    // Nothing listens there, which is recorded but does not fail the attempt
    let record = health(&harness, "arcade-leaderboard").unwrap();
    assert_eq!(record.url, "http://127.0.0.1:7002/");
}

#[tokio::test]
async fn test_unknown_target() {
    let harness = Harness::new();
    let state = harness.state().await;

    let err = state.dispatcher.deploy("ghost").await.unwrap_err();
    assert!(matches!(err, launchpad::errors::LaunchpadError::TargetNotFound(name) if name == "ghost"));
}

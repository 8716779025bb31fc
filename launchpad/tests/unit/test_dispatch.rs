//! Trigger dispatch tests

mod common;

use std::time::Duration;

use hook_models::models::PushEvent;

use common::{FakeSource, Harness};

use launchpad::dispatch::trigger::PushOutcome;
use launchpad::errors::LaunchpadError;

const DRAIN: Duration = Duration::from_secs(30);

fn push(full_name: &str, git_ref: &str) -> PushEvent {
    let name = full_name.rsplit('/').next().unwrap_or(full_name);
    serde_json::from_value(serde_json::json!({
        "ref": git_ref,
        "repository": {"name": name, "full_name": full_name},
        "after": "abc1234567890"
    }))
    .unwrap()
}

#[tokio::test]
async fn test_push_to_other_branch_deploys_nothing() {
    let harness = Harness::new();
    harness.write_app("api", &harness.app_yaml("api", "true"));
    let state = harness.state().await;

    let outcome = state
        .dispatcher
        .enqueue_push(&push("org/api", "refs/heads/feature-x"))
        .await
        .unwrap();
    assert_eq!(outcome, PushOutcome::BranchMismatch("feature-x".to_string()));

    state.dispatcher.drain(DRAIN).await.unwrap();
    assert!(harness.source.synced().is_empty());
    let history = state.dispatcher.deployer().history().history("api").await.unwrap();
    assert!(history.history.is_empty());
}

#[tokio::test]
async fn test_push_outcomes() {
    let harness = Harness::new();
    harness.write_app("api", &harness.app_yaml("api", "true"));
    let state = harness.state().await;

    let tag = state
        .dispatcher
        .enqueue_push(&push("org/api", "refs/tags/v1.0.0"))
        .await
        .unwrap();
    assert_eq!(tag, PushOutcome::NotABranch("refs/tags/v1.0.0".to_string()));

    let unknown = state
        .dispatcher
        .enqueue_push(&push("org/unknown", "refs/heads/main"))
        .await
        .unwrap();
    assert_eq!(unknown, PushOutcome::NoMatch);

    // Same repository name under another owner
    let other_owner = state
        .dispatcher
        .enqueue_push(&push("someone-else/api", "refs/heads/main"))
        .await
        .unwrap();
    assert_eq!(other_owner, PushOutcome::NoMatch);

    let accepted = state
        .dispatcher
        .enqueue_push(&push("org/api", "refs/heads/main"))
        .await
        .unwrap();
    assert_eq!(accepted, PushOutcome::Accepted(vec!["api".to_string()]));

    state.dispatcher.drain(DRAIN).await.unwrap();
    let history = state.dispatcher.deployer().history().history("api").await.unwrap();
    assert_eq!(history.history.len(), 1);
}

#[tokio::test]
async fn test_push_fans_out_to_engine_and_modules() {
    let harness = Harness::new();
    harness.write_engine(
        "arcade",
        &format!(
            r#"
name: arcade
server:
  repo: https://github.com/org/arcade.git
  path: {path}
  build:
    command: "true"
  start:
    command: node server.js
modules:
  lobby: {{}}
"#,
            path = harness.srv("arcade").display()
        ),
    );
    let state = harness.state().await;

    let outcome = state
        .dispatcher
        .enqueue_push(&push("org/arcade", "refs/heads/main"))
        .await
        .unwrap();
    let PushOutcome::Accepted(mut targets) = outcome else {
        panic!("expected the push to be accepted, got {:?}", outcome);
    };
    targets.sort();
    assert_eq!(targets, vec!["arcade-engine".to_string(), "arcade-lobby".to_string()]);

    state.dispatcher.drain(DRAIN).await.unwrap();
    for target in targets {
        let history = state.dispatcher.deployer().history().history(&target).await.unwrap();
        assert_eq!(history.history.len(), 1, "{}", target);
    }
}

#[tokio::test]
async fn test_engine_and_its_modules_share_one_checkout_slot() {
    let harness = Harness::with_source(FakeSource::slow(Duration::from_millis(300)));
    harness.write_engine(
        "arcade",
        &format!(
            r#"
name: arcade
server:
  repo: git@github.com:org/arcade.git
  path: {path}
  start:
    command: node server.js
modules:
  lobby: {{}}
  chat:
    subpath: chat
"#,
            path = harness.srv("arcade").display()
        ),
    );
    let state = harness.state().await;

    let outcome = state
        .dispatcher
        .enqueue_push(&push("org/arcade", "refs/heads/main"))
        .await
        .unwrap();
    let PushOutcome::Accepted(targets) = outcome else {
        panic!("expected the push to be accepted, got {:?}", outcome);
    };
    assert_eq!(targets.len(), 3);

    state.dispatcher.drain(DRAIN).await.unwrap();
    // Three target ids, one working copy: never synchronized concurrently
    assert_eq!(harness.source.max_running(), 1);
    assert_eq!(harness.source.synced().len(), 3);
}

#[tokio::test]
async fn test_push_matches_prefixed_repository_path() {
    let harness = Harness::new();
    harness.write_app(
        "api",
        &harness
            .app_yaml("api", "true")
            .replace("git@github.com:org/api.git", "https://git.example.com/scm/org/api.git"),
    );
    let state = harness.state().await;

    let outcome = state
        .dispatcher
        .enqueue_push(&push("org/api", "refs/heads/main"))
        .await
        .unwrap();
    assert_eq!(outcome, PushOutcome::Accepted(vec!["api".to_string()]));
    state.dispatcher.drain(DRAIN).await.unwrap();
}

#[tokio::test]
async fn test_same_target_is_serialized() {
    let harness = Harness::with_source(FakeSource::slow(Duration::from_millis(300)));
    harness.write_app("api", &harness.app_yaml("api", "true"));
    let state = harness.state().await;

    for _ in 0..2 {
        let outcome = state
            .dispatcher
            .enqueue_push(&push("org/api", "refs/heads/main"))
            .await
            .unwrap();
        assert_eq!(outcome, PushOutcome::Accepted(vec!["api".to_string()]));
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(state.dispatcher.is_busy("api"));

    state.dispatcher.drain(DRAIN).await.unwrap();
    assert_eq!(harness.source.max_running(), 1);
    assert!(!state.dispatcher.is_busy("api"));

    let history = state.dispatcher.deployer().history().history("api").await.unwrap();
    assert_eq!(history.history.len(), 2);
}

#[tokio::test]
async fn test_different_targets_overlap() {
    let harness = Harness::with_source(FakeSource::slow(Duration::from_millis(300)));
    harness.write_app("api", &harness.app_yaml("api", "true"));
    harness.write_app("web", &harness.app_yaml("web", "true"));
    let state = harness.state().await;

    assert_eq!(state.dispatcher.enqueue_app("api").await.unwrap(), "api");
    assert_eq!(state.dispatcher.enqueue_app("web").await.unwrap(), "web");

    state.dispatcher.drain(DRAIN).await.unwrap();
    assert_eq!(harness.source.max_running(), 2);

    // Concurrent allocations still hand out distinct ports
    let ports = state.dispatcher.deployer().ports().state().await.unwrap();
    assert_ne!(ports.allocations["api"], ports.allocations["web"]);
}

#[tokio::test]
async fn test_enqueue_app_ignores_engines() {
    let harness = Harness::new();
    harness.write_engine(
        "arcade",
        &format!(
            "name: arcade\nserver:\n  repo: git@github.com:org/arcade.git\n  path: {}\n",
            harness.srv("arcade").display()
        ),
    );
    let state = harness.state().await;

    let err = state.dispatcher.enqueue_app("arcade").await.unwrap_err();
    assert!(matches!(err, LaunchpadError::TargetNotFound(_)));
    state.dispatcher.drain(DRAIN).await.unwrap();
    assert!(harness.source.synced().is_empty());
}

#[tokio::test]
async fn test_app_wins_over_engine_with_same_name() {
    let harness = Harness::new();
    harness.write_app("arcade", &harness.app_yaml("arcade", "true"));
    harness.write_engine(
        "arcade",
        &format!(
            "name: arcade\nserver:\n  repo: git@github.com:org/arcade-engine.git\n  path: {}\n",
            harness.srv("arcade-engine").display()
        ),
    );
    let state = harness.state().await;

    let result = state.dispatcher.deploy("arcade").await.unwrap();
    assert_eq!(result.target, "arcade");
}

#[tokio::test]
async fn test_malformed_descriptor_does_not_hide_others() {
    let harness = Harness::new();
    harness.write_app("api", &harness.app_yaml("api", "true"));
    harness.write_app("broken", "name: broken\nrepo: [not, a, string\n");
    let state = harness.state().await;

    let snapshot = state.dispatcher.config().snapshot().await.unwrap();
    assert_eq!(snapshot.apps.len(), 1);
    assert_eq!(snapshot.failures.len(), 1);

    assert!(state.dispatcher.deploy("api").await.unwrap().success);
}

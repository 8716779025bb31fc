//! FSM unit tests

use launchpad::deploy::fsm::{DeploymentEvent, DeploymentFsm, DeploymentState, Phase};

#[test]
fn test_fsm_initial_state() {
    let fsm = DeploymentFsm::new();
    assert_eq!(fsm.state(), &DeploymentState::Started);
    assert!(fsm.failure().is_none());
    assert!(!fsm.succeeded());
}

#[test]
fn test_fsm_deploy_success_flow() {
    let mut fsm = DeploymentFsm::new();

    fsm.process(DeploymentEvent::SourceSynced).unwrap();
    assert_eq!(fsm.state(), &DeploymentState::SourceSynced);

    fsm.process(DeploymentEvent::Built).unwrap();
    assert_eq!(fsm.state(), &DeploymentState::Built);

    fsm.process(DeploymentEvent::ProcessTransitioned).unwrap();
    assert_eq!(fsm.state(), &DeploymentState::ProcessTransitioned);

    fsm.process(DeploymentEvent::Recorded).unwrap();
    assert_eq!(fsm.state(), &DeploymentState::Recorded);
    assert!(fsm.succeeded());
}

#[test]
fn test_fsm_failure_from_started() {
    let mut fsm = DeploymentFsm::new();

    fsm.process(DeploymentEvent::Failed {
        phase: Phase::Acquire,
        error: "clone failed".to_string(),
    })
    .unwrap();

    assert_eq!(fsm.state(), &DeploymentState::Failed);
    assert_eq!(fsm.failure(), Some((Phase::Acquire, "clone failed")));
}

#[test]
fn test_fsm_failed_attempt_cannot_continue() {
    let mut fsm = DeploymentFsm::new();

    fsm.process(DeploymentEvent::SourceSynced).unwrap();
    fsm.process(DeploymentEvent::Failed {
        phase: Phase::Build,
        error: "exit 1".to_string(),
    })
    .unwrap();

    // No activation after a failed build
    assert!(fsm.process(DeploymentEvent::ProcessTransitioned).is_err());
    assert!(fsm.process(DeploymentEvent::Built).is_err());

    fsm.process(DeploymentEvent::Recorded).unwrap();
    assert_eq!(fsm.state(), &DeploymentState::Recorded);
    assert!(!fsm.succeeded());
}

#[test]
fn test_fsm_invalid_transition() {
    let mut fsm = DeploymentFsm::new();

    // Cannot build before the source is synced
    let result = fsm.process(DeploymentEvent::Built);
    assert!(result.is_err());
}

#[test]
fn test_fsm_recorded_is_terminal() {
    let mut fsm = DeploymentFsm::new();
    fsm.process(DeploymentEvent::SourceSynced).unwrap();
    fsm.process(DeploymentEvent::Built).unwrap();
    fsm.process(DeploymentEvent::ProcessTransitioned).unwrap();
    fsm.process(DeploymentEvent::Recorded).unwrap();

    assert!(fsm
        .process(DeploymentEvent::Failed {
            phase: Phase::Record,
            error: "late".to_string(),
        })
        .is_err());
}

//! Finite state machine for a single deployment attempt

use std::fmt;

use serde::{Deserialize, Serialize};

/// Ordered steps of one deployment attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Clone the working copy when it is not a checkout yet
    Acquire,
    /// Fetch and hard-reset to the remote branch
    Synchronize,
    /// Stop the running process before building
    Quiesce,
    /// Run the build command
    Build,
    /// Start the process or run the deploy script
    Activate,
    /// Append the deployment record
    Record,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Acquire => "acquire",
            Phase::Synchronize => "synchronize",
            Phase::Quiesce => "quiesce",
            Phase::Build => "build",
            Phase::Activate => "activate",
            Phase::Record => "record",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deployment state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    /// Attempt accepted, nothing touched yet
    Started,

    /// Working copy matches the remote branch
    SourceSynced,

    /// Build finished
    Built,

    /// Process restarted or deploy script ran
    ProcessTransitioned,

    /// A phase failed, remaining phases are skipped
    Failed,

    /// Outcome written to history
    Recorded,
}

/// Deployment event
#[derive(Debug, Clone)]
pub enum DeploymentEvent {
    /// Acquire and synchronize completed
    SourceSynced,

    /// Build completed
    Built,

    /// Activation completed
    ProcessTransitioned,

    /// A phase failed
    Failed { phase: Phase, error: String },

    /// Outcome persisted
    Recorded,
}

/// Deployment FSM
#[derive(Debug, Clone)]
pub struct DeploymentFsm {
    state: DeploymentState,
    failure: Option<(Phase, String)>,
}

impl DeploymentFsm {
    /// Create a new FSM in the started state
    pub fn new() -> Self {
        Self {
            state: DeploymentState::Started,
            failure: None,
        }
    }

    /// Get current state
    pub fn state(&self) -> &DeploymentState {
        &self.state
    }

    /// Failed phase and error message, if the attempt failed
    pub fn failure(&self) -> Option<(Phase, &str)> {
        self.failure.as_ref().map(|(phase, err)| (*phase, err.as_str()))
    }

    /// Whether the attempt was recorded without a failure
    pub fn succeeded(&self) -> bool {
        self.state == DeploymentState::Recorded && self.failure.is_none()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: DeploymentEvent) -> Result<(), String> {
        let new_state = match (&self.state, &event) {
            (DeploymentState::Started, DeploymentEvent::SourceSynced) => DeploymentState::SourceSynced,
            (DeploymentState::SourceSynced, DeploymentEvent::Built) => DeploymentState::Built,
            (DeploymentState::Built, DeploymentEvent::ProcessTransitioned) => {
                DeploymentState::ProcessTransitioned
            }
            (DeploymentState::ProcessTransitioned, DeploymentEvent::Recorded) => DeploymentState::Recorded,

            // Any in-flight state may fail
            (
                DeploymentState::Started
                | DeploymentState::SourceSynced
                | DeploymentState::Built
                | DeploymentState::ProcessTransitioned,
                DeploymentEvent::Failed { phase, error },
            ) => {
                self.failure = Some((*phase, error.clone()));
                DeploymentState::Failed
            }

            (DeploymentState::Failed, DeploymentEvent::Recorded) => DeploymentState::Recorded,

            // Invalid transitions
            (state, event) => {
                return Err(format!(
                    "Invalid transition: {:?} -> {:?}",
                    state, event
                ));
            }
        };

        self.state = new_state;
        Ok(())
    }
}

impl Default for DeploymentFsm {
    fn default() -> Self {
        Self::new()
    }
}

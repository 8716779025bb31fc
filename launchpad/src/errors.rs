//! Error types for launchpad

use std::path::PathBuf;

use thiserror::Error;

use crate::deploy::fsm::Phase;

/// Main error type for launchpad
#[derive(Error, Debug)]
pub enum LaunchpadError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Invalid descriptor {}: {message}", file.display())]
    ValidationError { file: PathBuf, message: String },

    #[error("Target not found: {0}")]
    TargetNotFound(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailure(String),

    #[error("Port range '{range}' exhausted ({start}-{end})")]
    RangeExhausted { range: String, start: u16, end: u16 },

    #[error("Unknown port range: {0}")]
    UnknownRange(String),

    #[error("{phase} phase failed: {message}")]
    PhaseFailure { phase: Phase, message: String },

    #[error("Git error: {0}")]
    GitError(String),

    #[error("Process supervisor error: {0}")]
    SupervisorError(String),

    #[error("Command error: {0}")]
    CommandError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LaunchpadError {
    /// Wrap any error as a failure of the given deployment phase
    pub fn in_phase(self, phase: Phase) -> Self {
        match self {
            already @ LaunchpadError::PhaseFailure { .. } => already,
            other => LaunchpadError::PhaseFailure {
                phase,
                message: other.to_string(),
            },
        }
    }
}

impl From<anyhow::Error> for LaunchpadError {
    fn from(err: anyhow::Error) -> Self {
        LaunchpadError::Internal(err.to_string())
    }
}

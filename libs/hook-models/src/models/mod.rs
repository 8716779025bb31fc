//! Webhook API models

use serde::{Deserialize, Serialize};

/// Health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Acknowledgement returned for every accepted or ignored trigger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookResponse {
    pub status: HookStatus,
    pub message: String,

    /// Fully-qualified target id, present once a trigger has been accepted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl HookResponse {
    pub fn accepted(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: HookStatus::Accepted,
            message: message.into(),
            target: Some(target.into()),
        }
    }

    pub fn ignored(message: impl Into<String>) -> Self {
        Self {
            status: HookStatus::Ignored,
            message: message.into(),
            target: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookStatus {
    Accepted,
    Ignored,
}

/// Error body for rejected requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Push event payload, as sent by GitHub-compatible providers.
///
/// Only the fields the orchestrator reads are modelled; everything else is
/// ignored during deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushEvent {
    /// Full ref, e.g. `refs/heads/main`
    #[serde(rename = "ref")]
    pub git_ref: String,

    pub repository: Repository,

    #[serde(default)]
    pub after: Option<String>,

    #[serde(default)]
    pub pusher: Option<Pusher>,

    #[serde(default)]
    pub head_commit: Option<HeadCommit>,
}

impl PushEvent {
    /// Branch name for `refs/heads/*` refs, `None` for tags and other refs
    pub fn branch(&self) -> Option<&str> {
        self.git_ref.strip_prefix("refs/heads/")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,

    /// `owner/name`
    pub full_name: String,

    #[serde(default)]
    pub clone_url: Option<String>,

    #[serde(default)]
    pub ssh_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pusher {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadCommit {
    pub id: String,

    #[serde(default)]
    pub message: String,
}

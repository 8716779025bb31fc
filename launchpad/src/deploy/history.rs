//! Durable deployment history (`state/deployments.json`)

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::LaunchpadError;
use crate::filesys::file::File;
use crate::storage::document::JsonDocument;

/// Records kept per target, newest first
pub const MAX_HISTORY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Success,
    Failed,
    InProgress,
}

/// One deployment attempt. Never modified once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    /// Wall-clock derived, lexicographically sortable
    pub id: String,

    /// Short commit hash, present once the source was synchronized
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,

    /// RFC 3339 timestamp of the attempt start
    pub timestamp: String,

    pub status: DeploymentStatus,

    /// Milliseconds
    #[serde(rename = "duration")]
    pub duration_ms: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// History of a single target
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetHistory {
    /// Id of the most recent record
    #[serde(default)]
    pub current: Option<String>,

    #[serde(default)]
    pub history: Vec<DeploymentRecord>,
}

/// The history document, keyed by target id
pub type HistoryDocument = BTreeMap<String, TargetHistory>;

/// Deployment history store
pub struct HistoryStore {
    doc: JsonDocument<HistoryDocument>,
}

impl HistoryStore {
    pub fn new(file: File) -> Self {
        Self {
            doc: JsonDocument::new(file),
        }
    }

    /// Prepend a record, trim to `MAX_HISTORY` and mark it current
    pub async fn append(&self, target: &str, record: DeploymentRecord) -> Result<(), LaunchpadError> {
        self.doc
            .update(|doc| {
                let entry = doc.entry(target.to_string()).or_default();
                entry.current = Some(record.id.clone());
                entry.history.insert(0, record);
                entry.history.truncate(MAX_HISTORY);
                Ok(())
            })
            .await
    }

    /// History of `target`, newest first
    pub async fn history(&self, target: &str) -> Result<TargetHistory, LaunchpadError> {
        Ok(self.doc.load().await?.remove(target).unwrap_or_default())
    }

    /// The whole document
    pub async fn all(&self) -> Result<HistoryDocument, LaunchpadError> {
        self.doc.load().await
    }
}

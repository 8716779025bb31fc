//! Post-activation health probes and the health document (`state/health.json`)

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::types::HealthCheckSettings;
use crate::errors::LaunchpadError;
use crate::filesys::file::File;
use crate::storage::document::JsonDocument;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Latest probe outcome of a target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthRecord {
    pub status: HealthStatus,
    pub url: String,
    pub attempts: u32,
    pub checked_at: DateTime<Utc>,
    /// Attempt that triggered the probe
    pub deployment_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub type HealthDocument = BTreeMap<String, HealthRecord>;

/// Health document store, keyed by target id
pub struct HealthStore {
    doc: JsonDocument<HealthDocument>,
}

impl HealthStore {
    pub fn new(file: File) -> Self {
        Self {
            doc: JsonDocument::new(file),
        }
    }

    pub async fn record(&self, target: &str, record: HealthRecord) -> Result<(), LaunchpadError> {
        self.doc
            .update(|doc| {
                doc.insert(target.to_string(), record);
                Ok(())
            })
            .await
    }

    pub async fn get(&self, target: &str) -> Result<Option<HealthRecord>, LaunchpadError> {
        Ok(self.doc.load().await?.remove(target))
    }
}

/// Outcome of a probe run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub status: HealthStatus,
    pub attempts: u32,
    pub error: Option<String>,
}

/// HTTP prober for freshly activated processes
#[derive(Debug, Clone)]
pub struct HealthProber {
    client: Client,
}

impl HealthProber {
    pub fn new() -> Result<Self, LaunchpadError> {
        let client = Client::builder().build()?;
        Ok(Self { client })
    }

    pub fn url(port: u16, path: &str) -> String {
        if path.starts_with('/') {
            format!("http://127.0.0.1:{}{}", port, path)
        } else {
            format!("http://127.0.0.1:{}/{}", port, path)
        }
    }

    /// Probe `url` up to `retries` times (at least once), `interval` apart.
    /// Any 2xx or 3xx response counts as healthy.
    pub async fn probe(&self, url: &str, settings: &HealthCheckSettings, retries: u32) -> ProbeOutcome {
        let retries = retries.max(1);
        let interval = Duration::from_secs(settings.interval);
        let timeout = Duration::from_secs(settings.timeout.max(1));
        let mut last_error = None;

        for attempt in 1..=retries {
            if attempt > 1 {
                tokio::time::sleep(interval).await;
            }

            match self.client.get(url).timeout(timeout).send().await {
                Ok(response) if response.status().is_success() || response.status().is_redirection() => {
                    return ProbeOutcome {
                        status: HealthStatus::Healthy,
                        attempts: attempt,
                        error: None,
                    };
                }
                Ok(response) => {
                    debug!("Health probe {} attempt {}: {}", url, attempt, response.status());
                    last_error = Some(format!("status {}", response.status()));
                }
                Err(e) => {
                    debug!("Health probe {} attempt {}: {}", url, attempt, e);
                    last_error = Some(e.to_string());
                }
            }
        }

        ProbeOutcome {
            status: HealthStatus::Unhealthy,
            attempts: retries,
            error: last_error,
        }
    }
}

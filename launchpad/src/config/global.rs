//! Global settings (`config/global.yaml`)

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};

use crate::config::env::interpolate;
use crate::errors::LaunchpadError;

/// Global settings shared by every descriptor
#[derive(Debug, Deserialize)]
pub struct GlobalConfig {
    /// Webhook listener
    #[serde(default)]
    pub webhook: WebhookSettings,

    /// Named port ranges used by the allocator
    #[serde(default = "default_port_ranges")]
    pub ports: BTreeMap<String, PortRangeSettings>,

    /// TLS provisioning
    #[serde(default)]
    pub ssl: SslSettings,

    /// Defaults for descriptors that leave these unset
    #[serde(default)]
    pub defaults: DefaultSettings,

    /// Source-control provider
    #[serde(default)]
    pub git: GitSettings,

    /// Deployment policy
    #[serde(default)]
    pub deployment: DeploymentPolicy,
}

impl GlobalConfig {
    /// Parse the global file, resolving `${NAME}` placeholders first
    pub fn parse(raw: &str, file: &Path) -> Result<Self, LaunchpadError> {
        let invalid = |message: String| LaunchpadError::ValidationError {
            file: file.to_path_buf(),
            message,
        };

        let mut value: serde_yaml::Value = serde_yaml::from_str(raw).map_err(|e| invalid(e.to_string()))?;
        if value.is_null() {
            return Ok(Self::default());
        }
        interpolate(&mut value);

        let mut config: GlobalConfig = serde_yaml::from_value(value).map_err(|e| invalid(e.to_string()))?;
        for (name, range) in default_port_ranges() {
            config.ports.entry(name).or_insert(range);
        }
        config.validate().map_err(invalid)?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        for (name, range) in &self.ports {
            if range.start == 0 || range.start > range.end {
                return Err(format!(
                    "port range '{}' is invalid ({}-{})",
                    name, range.start, range.end
                ));
            }
        }
        Ok(())
    }
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            webhook: WebhookSettings::default(),
            ports: default_port_ranges(),
            ssl: SslSettings::default(),
            defaults: DefaultSettings::default(),
            git: GitSettings::default(),
            deployment: DeploymentPolicy::default(),
        }
    }
}

/// Webhook listener settings
#[derive(Debug, Deserialize)]
pub struct WebhookSettings {
    /// Host to bind to
    #[serde(default = "default_webhook_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_webhook_port")]
    pub port: u16,

    /// Shared HMAC secret, usually given as `${WEBHOOK_SECRET}`
    #[serde(default = "empty_secret", deserialize_with = "deserialize_secret")]
    pub secret: SecretString,
}

fn default_webhook_host() -> String {
    "0.0.0.0".to_string()
}

fn default_webhook_port() -> u16 {
    9000
}

fn empty_secret() -> SecretString {
    SecretString::from(String::new())
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(SecretString::from(raw.unwrap_or_default()))
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            host: default_webhook_host(),
            port: default_webhook_port(),
            secret: empty_secret(),
        }
    }
}

/// Bounds of a named port range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRangeSettings {
    pub start: u16,
    pub end: u16,
}

pub const STANDARD_RANGE: &str = "standard";
pub const GAMES_RANGE: &str = "games";
pub const SPECIAL_RANGE: &str = "special";

fn default_port_ranges() -> BTreeMap<String, PortRangeSettings> {
    BTreeMap::from([
        (STANDARD_RANGE.to_string(), PortRangeSettings { start: 3001, end: 3999 }),
        (GAMES_RANGE.to_string(), PortRangeSettings { start: 7000, end: 7999 }),
        (SPECIAL_RANGE.to_string(), PortRangeSettings { start: 9100, end: 9199 }),
    ])
}

/// TLS settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SslSettings {
    #[serde(default)]
    pub enabled: bool,

    /// Contact email used when a descriptor does not name one
    #[serde(default)]
    pub email: Option<String>,

    #[serde(default = "default_true")]
    pub auto_renew: bool,
}

impl Default for SslSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            email: None,
            auto_renew: true,
        }
    }
}

/// Defaults applied to descriptors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultSettings {
    /// Build timeout in seconds
    #[serde(default = "default_build_timeout")]
    pub build_timeout: u64,

    /// Supervisor memory ceiling, e.g. `512M`
    #[serde(default = "default_memory")]
    pub memory: String,

    /// Supervisor instance count
    #[serde(default = "default_instances")]
    pub instances: u32,
}

fn default_build_timeout() -> u64 {
    600
}

fn default_memory() -> String {
    "512M".to_string()
}

fn default_instances() -> u32 {
    1
}

impl Default for DefaultSettings {
    fn default() -> Self {
        Self {
            build_timeout: default_build_timeout(),
            memory: default_memory(),
            instances: default_instances(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GitProvider {
    #[default]
    Github,
    Gitlab,
    Gitea,
}

/// Source-control settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitSettings {
    #[serde(default)]
    pub provider: GitProvider,

    /// Identity file used when a descriptor has no `ssh_key`
    #[serde(default)]
    pub ssh_key: Option<PathBuf>,
}

/// Deployment policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentPolicy {
    #[serde(default = "default_keep_releases")]
    pub keep_releases: u32,

    #[serde(default = "default_health_check_retries")]
    pub health_check_retries: u32,

    /// Parsed and reported only; failed deployments are never rolled back
    #[serde(default)]
    pub rollback_on_failure: bool,
}

fn default_keep_releases() -> u32 {
    5
}

fn default_health_check_retries() -> u32 {
    3
}

impl Default for DeploymentPolicy {
    fn default() -> Self {
        Self {
            keep_releases: default_keep_releases(),
            health_check_retries: default_health_check_retries(),
            rollback_on_failure: false,
        }
    }
}

fn default_true() -> bool {
    true
}

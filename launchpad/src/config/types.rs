//! Descriptor building blocks shared by applications and engines

use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

use crate::config::global::DefaultSettings;

/// Kind of application being deployed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppKind {
    /// Web framework with a build step and a server (Next.js and friends)
    Nextjs,
    /// Generic long-running process
    #[default]
    Node,
    /// Static bundle served by a lightweight file server
    Static,
    /// Everything given explicitly by the descriptor
    Custom,
}

/// Runtime / package manager, selects the default build and start commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Runtime {
    #[default]
    Npm,
    Pnpm,
    Yarn,
    Bun,
    Python,
}

impl Runtime {
    fn install_command(&self) -> &'static str {
        match self {
            Runtime::Npm => "npm ci",
            Runtime::Pnpm => "pnpm install --frozen-lockfile",
            Runtime::Yarn => "yarn install --frozen-lockfile",
            Runtime::Bun => "bun install",
            Runtime::Python => "pip install -r requirements.txt",
        }
    }

    fn build_script(&self) -> Option<&'static str> {
        match self {
            Runtime::Npm => Some("npm run build"),
            Runtime::Pnpm => Some("pnpm build"),
            Runtime::Yarn => Some("yarn build"),
            Runtime::Bun => Some("bun run build"),
            Runtime::Python => None,
        }
    }

    /// Default build command for this runtime and kind
    pub fn default_build_command(&self, kind: AppKind) -> Option<String> {
        match kind {
            AppKind::Custom => None,
            AppKind::Node => Some(self.install_command().to_string()),
            AppKind::Nextjs | AppKind::Static => Some(match self.build_script() {
                Some(build) => format!("{} && {}", self.install_command(), build),
                None => self.install_command().to_string(),
            }),
        }
    }

    /// Default start command for this runtime and kind
    pub fn default_start_command(&self, kind: AppKind) -> Option<String> {
        let command = match (kind, self) {
            (AppKind::Custom, _) => return None,
            (AppKind::Static, _) => "npx serve -s dist -l $PORT",
            (_, Runtime::Npm) => "npm start",
            (_, Runtime::Pnpm) => "pnpm start",
            (_, Runtime::Yarn) => "yarn start",
            (_, Runtime::Bun) => "bun run start",
            (_, Runtime::Python) => "python3 app.py",
        };
        Some(command.to_string())
    }
}

/// How a target is activated after the build
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployMode {
    /// Long-running process owned by the process supervisor
    #[default]
    #[serde(alias = "supervised", alias = "supervised-process")]
    Pm2,
    /// A deploy script in the working copy performs activation
    Script,
    /// Engine modules only: restart the engine's own process
    Engine,
}

/// Raw `build:` block
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawBuild {
    #[serde(default)]
    pub command: Option<String>,

    /// Seconds
    #[serde(default)]
    pub timeout: Option<u64>,
}

/// Raw `start:` block
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawStart {
    #[serde(default)]
    pub command: Option<String>,
}

/// Resolved build step
#[derive(Debug, Clone, Serialize)]
pub struct BuildSpec {
    /// `None` skips the build phase
    pub command: Option<String>,
    pub timeout: Duration,
}

impl BuildSpec {
    pub fn resolve(raw: RawBuild, default_command: Option<String>, defaults: &DefaultSettings) -> Self {
        Self {
            command: non_empty(raw.command).or(default_command),
            timeout: Duration::from_secs(raw.timeout.unwrap_or(defaults.build_timeout)),
        }
    }
}

/// Raw `resources:` block
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawResources {
    #[serde(default)]
    pub memory: Option<String>,

    #[serde(default)]
    pub instances: Option<u32>,
}

/// Resolved supervisor limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resources {
    /// Memory ceiling before the supervisor restarts the process, e.g. `512M`
    pub memory: String,
    pub instances: u32,
}

impl Resources {
    pub fn resolve(raw: RawResources, defaults: &DefaultSettings) -> Self {
        Self {
            memory: non_empty(raw.memory).unwrap_or_else(|| defaults.memory.clone()),
            instances: raw.instances.filter(|n| *n > 0).unwrap_or(defaults.instances),
        }
    }
}

/// Reverse-proxy customization, consumed by the proxy generator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NginxSettings {
    #[serde(default = "default_client_max_body_size")]
    pub client_max_body_size: String,

    #[serde(default)]
    pub websocket: bool,

    /// Extra directives appended verbatim to the location block
    #[serde(default)]
    pub extra: Vec<String>,
}

fn default_client_max_body_size() -> String {
    "10m".to_string()
}

impl Default for NginxSettings {
    fn default() -> Self {
        Self {
            client_max_body_size: default_client_max_body_size(),
            websocket: false,
            extra: Vec::new(),
        }
    }
}

/// Post-activation health probe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_health_path")]
    pub path: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_health_timeout")]
    pub timeout: u64,

    /// Seconds between attempts
    #[serde(default = "default_health_interval")]
    pub interval: u64,
}

fn default_true() -> bool {
    true
}

fn default_health_path() -> String {
    "/".to_string()
}

fn default_health_timeout() -> u64 {
    5
}

fn default_health_interval() -> u64 {
    2
}

impl Default for HealthCheckSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_health_path(),
            timeout: default_health_timeout(),
            interval: default_health_interval(),
        }
    }
}

/// Environment maps accept any YAML scalar and store it as a string
pub fn deserialize_env<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<BTreeMap<String, serde_yaml::Value>>::deserialize(deserializer)?;
    let mut env = BTreeMap::new();
    for (key, value) in raw.unwrap_or_default() {
        let value = match value {
            serde_yaml::Value::Null => String::new(),
            serde_yaml::Value::Bool(b) => b.to_string(),
            serde_yaml::Value::Number(n) => n.to_string(),
            serde_yaml::Value::String(s) => s,
            other => {
                return Err(serde::de::Error::custom(format!(
                    "env var '{}' must be a scalar, got {:?}",
                    key, other
                )))
            }
        };
        env.insert(key, value);
    }
    Ok(env)
}

static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("name pattern is valid"));

/// Names become directory and process names, so they are restricted to a safe charset
pub fn validate_name(kind: &str, name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err(format!("{} name is required", kind));
    }
    if !NAME_PATTERN.is_match(name) {
        return Err(format!(
            "{} name '{}' may only contain letters, digits, '.', '_' and '-'",
            kind, name
        ));
    }
    Ok(())
}

/// Treat blank strings the same as absent ones
pub fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

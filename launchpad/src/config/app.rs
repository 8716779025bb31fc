//! Application descriptors (`config/apps/*.yaml`)

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::env::interpolate;
use crate::config::global::{GlobalConfig, STANDARD_RANGE};
use crate::config::types::{
    deserialize_env, non_empty, validate_name, AppKind, BuildSpec, DeployMode, HealthCheckSettings,
    NginxSettings, RawBuild, RawResources, RawStart, Resources, Runtime,
};
use crate::errors::LaunchpadError;

/// Fully resolved application descriptor
#[derive(Debug, Clone, Serialize)]
pub struct AppConfig {
    pub name: String,
    pub repo: String,
    pub branch: String,
    pub path: PathBuf,
    pub ssh_key: Option<PathBuf>,
    pub kind: AppKind,
    pub runtime: Runtime,

    /// Hand-pinned port; `None` means allocate from `port_range`
    pub port: Option<u16>,
    pub port_range: String,

    pub build: BuildSpec,
    pub start_command: Option<String>,
    pub deploy_mode: DeployMode,
    pub deploy_script: String,
    pub env: BTreeMap<String, String>,
    pub resources: Resources,

    /// Supervisor process name (`pm2_name` override, or `name`)
    pub process_name: String,

    pub domain: Option<String>,
    pub nginx: NginxSettings,
    pub health_check: HealthCheckSettings,
}

#[derive(Debug, Deserialize)]
struct RawAppConfig {
    #[serde(default)]
    name: String,
    #[serde(default)]
    repo: String,
    #[serde(default)]
    branch: Option<String>,
    #[serde(default)]
    path: Option<PathBuf>,
    #[serde(default)]
    ssh_key: Option<PathBuf>,
    #[serde(default, rename = "type")]
    kind: AppKind,
    #[serde(default)]
    runtime: Runtime,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    port_range: Option<String>,
    #[serde(default)]
    build: RawBuild,
    #[serde(default)]
    start: RawStart,
    #[serde(default)]
    deploy_mode: DeployMode,
    #[serde(default)]
    deploy_script: Option<String>,
    #[serde(default, deserialize_with = "deserialize_env")]
    env: BTreeMap<String, String>,
    #[serde(default)]
    resources: RawResources,
    #[serde(default)]
    pm2_name: Option<String>,
    #[serde(default)]
    domain: Option<String>,
    #[serde(default)]
    nginx: NginxSettings,
    #[serde(default)]
    health_check: HealthCheckSettings,
}

pub const DEFAULT_BRANCH: &str = "main";
pub const DEFAULT_DEPLOY_SCRIPT: &str = "deploy.sh";
pub const DEFAULT_APPS_ROOT: &str = "/var/www";

impl AppConfig {
    /// Parse and validate a descriptor. `file` only labels errors.
    pub fn parse(raw: &str, file: &Path, global: &GlobalConfig) -> Result<Self, LaunchpadError> {
        let invalid = |message: String| LaunchpadError::ValidationError {
            file: file.to_path_buf(),
            message,
        };

        let mut value: serde_yaml::Value = serde_yaml::from_str(raw).map_err(|e| invalid(e.to_string()))?;
        interpolate(&mut value);
        let raw: RawAppConfig = serde_yaml::from_value(value).map_err(|e| invalid(e.to_string()))?;

        Self::resolve(raw, global).map_err(invalid)
    }

    fn resolve(raw: RawAppConfig, global: &GlobalConfig) -> Result<Self, String> {
        validate_name("application", &raw.name)?;
        if raw.repo.trim().is_empty() {
            return Err(format!("application '{}' is missing 'repo'", raw.name));
        }
        if raw.deploy_mode == DeployMode::Engine {
            return Err(format!(
                "application '{}': deploy_mode 'engine' is only valid for engine modules",
                raw.name
            ));
        }

        let port_range = non_empty(raw.port_range).unwrap_or_else(|| STANDARD_RANGE.to_string());
        if raw.port.is_none() && !global.ports.contains_key(&port_range) {
            return Err(format!(
                "application '{}' uses unknown port range '{}'",
                raw.name, port_range
            ));
        }

        let start_command = non_empty(raw.start.command).or_else(|| raw.runtime.default_start_command(raw.kind));
        if raw.deploy_mode == DeployMode::Pm2 && start_command.is_none() {
            return Err(format!(
                "application '{}' needs 'start.command' for deploy_mode 'pm2'",
                raw.name
            ));
        }

        let path = raw
            .path
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new(DEFAULT_APPS_ROOT).join(&raw.name));

        Ok(Self {
            branch: non_empty(raw.branch).unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
            path,
            ssh_key: raw.ssh_key,
            kind: raw.kind,
            runtime: raw.runtime,
            port: raw.port,
            port_range,
            build: BuildSpec::resolve(
                raw.build,
                raw.runtime.default_build_command(raw.kind),
                &global.defaults,
            ),
            start_command,
            deploy_mode: raw.deploy_mode,
            deploy_script: non_empty(raw.deploy_script).unwrap_or_else(|| DEFAULT_DEPLOY_SCRIPT.to_string()),
            env: raw.env,
            resources: Resources::resolve(raw.resources, &global.defaults),
            process_name: non_empty(raw.pm2_name).unwrap_or_else(|| raw.name.clone()),
            domain: non_empty(raw.domain),
            nginx: raw.nginx,
            health_check: raw.health_check,
            repo: raw.repo,
            name: raw.name,
        })
    }
}

//! Engine descriptors (`config/engines/*.yaml`)
//!
//! An engine is a parent process with its own checkout. Modules either live
//! inside that checkout or bring their own repository.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::app::{DEFAULT_APPS_ROOT, DEFAULT_BRANCH, DEFAULT_DEPLOY_SCRIPT};
use crate::config::env::interpolate;
use crate::config::global::GlobalConfig;
use crate::config::types::{
    deserialize_env, non_empty, validate_name, AppKind, BuildSpec, DeployMode, RawBuild, RawResources,
    RawStart, Resources, Runtime,
};
use crate::errors::LaunchpadError;

/// Fully resolved engine descriptor
#[derive(Debug, Clone, Serialize)]
pub struct EngineConfig {
    pub name: String,
    pub server: EngineServer,
    pub modules: BTreeMap<String, ModuleConfig>,
}

/// The engine's own server process
#[derive(Debug, Clone, Serialize)]
pub struct EngineServer {
    pub repo: String,
    pub branch: String,
    pub path: PathBuf,
    pub ssh_key: Option<PathBuf>,
    pub runtime: Runtime,
    pub build: BuildSpec,
    pub start_command: Option<String>,

    /// Ports the engine manages itself; the first one is handed to the process as `PORT`
    pub ports: Vec<u16>,
    pub env: BTreeMap<String, String>,
    pub resources: Resources,
    pub process_name: String,
}

impl EngineServer {
    pub fn primary_port(&self) -> Option<u16> {
        self.ports.first().copied()
    }
}

/// A module hosted by an engine
#[derive(Debug, Clone, Serialize)]
pub struct ModuleConfig {
    pub name: String,

    /// Own repository; `None` means the module lives in the engine checkout
    pub repo: Option<String>,
    pub branch: String,
    pub path: Option<PathBuf>,
    pub subpath: Option<PathBuf>,
    pub ssh_key: Option<PathBuf>,
    pub port: Option<u16>,
    pub domain: Option<String>,
    pub deploy_mode: DeployMode,
    pub deploy_script: String,
    pub runtime: Option<Runtime>,
    pub build: BuildSpec,
    pub start_command: Option<String>,
    pub env: BTreeMap<String, String>,
    pub resources: Resources,
    pub process_name: String,
}

#[derive(Debug, Deserialize)]
struct RawEngineConfig {
    #[serde(default)]
    name: String,
    #[serde(default)]
    server: Option<RawEngineServer>,
    #[serde(default)]
    modules: BTreeMap<String, RawModuleConfig>,
}

#[derive(Debug, Deserialize)]
struct RawEngineServer {
    #[serde(default)]
    repo: String,
    #[serde(default)]
    branch: Option<String>,
    #[serde(default)]
    path: Option<PathBuf>,
    #[serde(default)]
    ssh_key: Option<PathBuf>,
    #[serde(default)]
    runtime: Runtime,
    #[serde(default)]
    build: RawBuild,
    #[serde(default)]
    start: RawStart,
    #[serde(default)]
    ports: Vec<u16>,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default, deserialize_with = "deserialize_env")]
    env: BTreeMap<String, String>,
    #[serde(default)]
    resources: RawResources,
    #[serde(default)]
    pm2_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawModuleConfig {
    #[serde(default)]
    repo: Option<String>,
    #[serde(default)]
    branch: Option<String>,
    #[serde(default)]
    path: Option<PathBuf>,
    #[serde(default)]
    subpath: Option<PathBuf>,
    #[serde(default)]
    ssh_key: Option<PathBuf>,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    domain: Option<String>,
    #[serde(default)]
    deploy_mode: Option<DeployMode>,
    #[serde(default)]
    deploy_script: Option<String>,
    #[serde(default)]
    runtime: Option<Runtime>,
    #[serde(default)]
    build: RawBuild,
    #[serde(default)]
    start: RawStart,
    #[serde(default, deserialize_with = "deserialize_env")]
    env: BTreeMap<String, String>,
    #[serde(default)]
    resources: RawResources,
    #[serde(default)]
    pm2_name: Option<String>,
}

impl EngineConfig {
    /// Parse and validate a descriptor. `file` only labels errors.
    pub fn parse(raw: &str, file: &Path, global: &GlobalConfig) -> Result<Self, LaunchpadError> {
        let invalid = |message: String| LaunchpadError::ValidationError {
            file: file.to_path_buf(),
            message,
        };

        let mut value: serde_yaml::Value = serde_yaml::from_str(raw).map_err(|e| invalid(e.to_string()))?;
        interpolate(&mut value);
        let raw: RawEngineConfig = serde_yaml::from_value(value).map_err(|e| invalid(e.to_string()))?;

        Self::resolve(raw, global).map_err(invalid)
    }

    fn resolve(raw: RawEngineConfig, global: &GlobalConfig) -> Result<Self, String> {
        validate_name("engine", &raw.name)?;
        let server = raw
            .server
            .ok_or_else(|| format!("engine '{}' is missing 'server'", raw.name))?;
        if server.repo.trim().is_empty() {
            return Err(format!("engine '{}' is missing 'server.repo'", raw.name));
        }

        let mut ports = server.ports;
        if let Some(port) = server.port {
            if !ports.contains(&port) {
                ports.insert(0, port);
            }
        }

        let branch = non_empty(server.branch).unwrap_or_else(|| DEFAULT_BRANCH.to_string());
        let server = EngineServer {
            path: server
                .path
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new(DEFAULT_APPS_ROOT).join(&raw.name)),
            ssh_key: server.ssh_key,
            runtime: server.runtime,
            build: BuildSpec::resolve(
                server.build,
                server.runtime.default_build_command(AppKind::Node),
                &global.defaults,
            ),
            start_command: non_empty(server.start.command)
                .or_else(|| server.runtime.default_start_command(AppKind::Node)),
            ports,
            env: server.env,
            resources: Resources::resolve(server.resources, &global.defaults),
            process_name: non_empty(server.pm2_name).unwrap_or_else(|| raw.name.clone()),
            repo: server.repo,
            branch,
        };

        let mut modules = BTreeMap::new();
        for (module_name, module) in raw.modules {
            let resolved = resolve_module(&raw.name, &module_name, module, &server, global)?;
            modules.insert(module_name, resolved);
        }

        Ok(Self {
            name: raw.name,
            server,
            modules,
        })
    }

    /// Effective working copy of a module: its own path, else `subpath` under
    /// the engine checkout, else the engine checkout itself
    pub fn module_path(&self, module: &ModuleConfig) -> PathBuf {
        if let Some(path) = &module.path {
            return path.clone();
        }
        if let Some(subpath) = &module.subpath {
            return self.server.path.join(subpath);
        }
        self.server.path.clone()
    }

    /// Every port this engine pins, its own and its modules'
    pub fn pinned_ports(&self) -> impl Iterator<Item = u16> + '_ {
        self.server
            .ports
            .iter()
            .copied()
            .chain(self.modules.values().filter_map(|m| m.port))
    }
}

fn resolve_module(
    engine: &str,
    name: &str,
    raw: RawModuleConfig,
    server: &EngineServer,
    global: &GlobalConfig,
) -> Result<ModuleConfig, String> {
    validate_name("module", name)?;

    let repo = non_empty(raw.repo);
    // A module with its own repository needs its own checkout
    let path = raw
        .path
        .filter(|p| !p.as_os_str().is_empty())
        .or_else(|| {
            repo.as_ref()
                .map(|_| Path::new(DEFAULT_APPS_ROOT).join(format!("{}-{}", engine, name)))
        });

    let deploy_mode = raw.deploy_mode.unwrap_or(if repo.is_some() {
        DeployMode::Pm2
    } else {
        DeployMode::Engine
    });

    let default_build = raw.runtime.and_then(|r| r.default_build_command(AppKind::Node));
    let start_command = non_empty(raw.start.command)
        .or_else(|| raw.runtime.and_then(|r| r.default_start_command(AppKind::Node)));
    if deploy_mode == DeployMode::Pm2 && start_command.is_none() {
        return Err(format!(
            "module '{}' of engine '{}' needs 'start.command' or 'runtime' for deploy_mode 'pm2'",
            name, engine
        ));
    }

    Ok(ModuleConfig {
        name: name.to_string(),
        branch: non_empty(raw.branch).unwrap_or_else(|| server.branch.clone()),
        repo,
        path,
        subpath: raw.subpath.filter(|p| !p.as_os_str().is_empty()),
        ssh_key: raw.ssh_key.or_else(|| server.ssh_key.clone()),
        port: raw.port,
        domain: non_empty(raw.domain),
        deploy_mode,
        deploy_script: non_empty(raw.deploy_script).unwrap_or_else(|| DEFAULT_DEPLOY_SCRIPT.to_string()),
        runtime: raw.runtime,
        build: BuildSpec::resolve(raw.build, default_build, &global.defaults),
        start_command,
        env: raw.env,
        resources: Resources::resolve(raw.resources, &global.defaults),
        process_name: non_empty(raw.pm2_name).unwrap_or_else(|| format!("{}-{}", engine, name)),
    })
}

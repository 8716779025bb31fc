//! Deployable targets, flattened into a single plan shape
//!
//! Applications, engine servers and engine modules all run through the same
//! phase skeleton; they differ only in where the source lives, where the
//! build runs and how the result is activated.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::config::app::AppConfig;
use crate::config::engine::{EngineConfig, ModuleConfig};
use crate::config::global::GAMES_RANGE;
use crate::config::types::{BuildSpec, DeployMode, HealthCheckSettings, Resources};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    App,
    Engine,
    Module,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TargetKind::App => "application",
            TargetKind::Engine => "engine",
            TargetKind::Module => "module",
        })
    }
}

/// History, log and queue key of an engine server
pub fn engine_target_id(engine: &str) -> String {
    format!("{}-engine", engine)
}

/// History, log and queue key of an engine module
pub fn module_target_id(engine: &str, module: &str) -> String {
    format!("{}-{}", engine, module)
}

/// Where the `PORT` of a supervised process comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortSource {
    Fixed(u16),
    /// Sticky allocation keyed by `name` from the named range
    Allocate { name: String, range: String },
    None,
}

/// How the build output goes live
#[derive(Debug, Clone)]
pub enum Activation {
    /// Run a script from the working copy
    Script { script: String, port: Option<u16> },

    /// Fresh supervisor registration
    Supervised {
        process: String,
        command: Option<String>,
        port: PortSource,
        resources: Resources,
    },

    /// Restart a process owned by another target
    RestartProcess { process: String },
}

/// Everything the engine needs to deploy one target
#[derive(Debug, Clone)]
pub struct DeployPlan {
    pub kind: TargetKind,
    pub target_id: String,
    pub repo: String,
    pub branch: String,
    pub ssh_key: Option<PathBuf>,
    /// Git working copy
    pub checkout: PathBuf,
    /// Build and activation directory, inside or equal to `checkout`
    pub workdir: PathBuf,
    pub build: BuildSpec,
    pub env: BTreeMap<String, String>,
    pub activation: Activation,
    pub health_check: HealthCheckSettings,
    /// Ports managed by an engine server process
    pub engine_ports: Option<(String, Vec<u16>)>,
}

impl DeployPlan {
    pub fn for_app(app: &AppConfig) -> Self {
        let activation = match app.deploy_mode {
            DeployMode::Script => Activation::Script {
                script: app.deploy_script.clone(),
                port: app.port,
            },
            // Rejected at parse time; treated as supervised if it ever gets here
            DeployMode::Pm2 | DeployMode::Engine => Activation::Supervised {
                process: app.process_name.clone(),
                command: app.start_command.clone(),
                port: match app.port {
                    Some(port) => PortSource::Fixed(port),
                    None => PortSource::Allocate {
                        name: app.name.clone(),
                        range: app.port_range.clone(),
                    },
                },
                resources: app.resources.clone(),
            },
        };

        Self {
            kind: TargetKind::App,
            target_id: app.name.clone(),
            repo: app.repo.clone(),
            branch: app.branch.clone(),
            ssh_key: app.ssh_key.clone(),
            checkout: app.path.clone(),
            workdir: app.path.clone(),
            build: app.build.clone(),
            env: app.env.clone(),
            activation,
            health_check: app.health_check.clone(),
            engine_ports: None,
        }
    }

    pub fn for_engine(engine: &EngineConfig) -> Self {
        let server = &engine.server;
        Self {
            kind: TargetKind::Engine,
            target_id: engine_target_id(&engine.name),
            repo: server.repo.clone(),
            branch: server.branch.clone(),
            ssh_key: server.ssh_key.clone(),
            checkout: server.path.clone(),
            workdir: server.path.clone(),
            build: server.build.clone(),
            env: server.env.clone(),
            activation: Activation::Supervised {
                process: server.process_name.clone(),
                command: server.start_command.clone(),
                port: server.primary_port().map_or(PortSource::None, PortSource::Fixed),
                resources: server.resources.clone(),
            },
            health_check: HealthCheckSettings::default(),
            engine_ports: Some((engine.name.clone(), server.ports.clone())),
        }
    }

    pub fn for_module(engine: &EngineConfig, module: &ModuleConfig) -> Self {
        let target_id = module_target_id(&engine.name, &module.name);
        let workdir = engine.module_path(module);

        // Modules without their own repository build inside the engine checkout
        let (repo, checkout) = match &module.repo {
            Some(repo) => (repo.clone(), workdir.clone()),
            None => (engine.server.repo.clone(), engine.server.path.clone()),
        };

        let activation = match module.deploy_mode {
            DeployMode::Script => Activation::Script {
                script: module.deploy_script.clone(),
                port: module.port,
            },
            DeployMode::Engine => Activation::RestartProcess {
                process: engine.server.process_name.clone(),
            },
            DeployMode::Pm2 => Activation::Supervised {
                process: module.process_name.clone(),
                command: module.start_command.clone(),
                port: match module.port {
                    Some(port) => PortSource::Fixed(port),
                    None => PortSource::Allocate {
                        name: target_id.clone(),
                        range: GAMES_RANGE.to_string(),
                    },
                },
                resources: module.resources.clone(),
            },
        };

        let mut env = engine.server.env.clone();
        env.extend(module.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        Self {
            kind: TargetKind::Module,
            target_id,
            repo,
            branch: module.branch.clone(),
            ssh_key: module.ssh_key.clone(),
            checkout,
            workdir,
            build: module.build.clone(),
            env,
            activation,
            health_check: HealthCheckSettings::default(),
            engine_ports: None,
        }
    }

    /// Supervised process stopped before the build, if any
    pub fn quiesce_process(&self) -> Option<&str> {
        match &self.activation {
            Activation::Supervised { process, .. } => Some(process),
            _ => None,
        }
    }
}

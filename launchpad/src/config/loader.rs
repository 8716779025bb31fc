//! Descriptor loading
//!
//! Descriptors are read fresh on every call; nothing is cached between
//! triggers. A malformed file is reported and skipped, never aborting the
//! load of its siblings.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::app::AppConfig;
use crate::config::engine::{EngineConfig, ModuleConfig};
use crate::config::global::GlobalConfig;
use crate::errors::LaunchpadError;
use crate::filesys::dir::Dir;
use crate::ports::allocator::PinnedPorts;
use crate::storage::layout::StorageLayout;

const DESCRIPTOR_EXTENSIONS: &[&str] = &["yaml", "yml"];

/// Outcome of loading a directory of descriptors
#[derive(Debug)]
pub struct LoadReport<T> {
    pub items: Vec<T>,
    pub failures: Vec<LaunchpadError>,
}

impl<T> Default for LoadReport<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            failures: Vec::new(),
        }
    }
}

/// Everything a single trigger needs, loaded at one point in time
#[derive(Debug)]
pub struct ConfigSnapshot {
    pub global: GlobalConfig,
    pub apps: Vec<AppConfig>,
    pub engines: Vec<EngineConfig>,
    pub failures: Vec<LaunchpadError>,
}

impl ConfigSnapshot {
    pub fn find_app(&self, name: &str) -> Option<&AppConfig> {
        self.apps.iter().find(|a| a.name == name)
    }

    pub fn find_engine(&self, name: &str) -> Option<&EngineConfig> {
        self.engines.iter().find(|e| e.name == name)
    }

    /// Find a module by `engine:module`, or by bare module name across engines
    pub fn find_module(&self, name: &str) -> Option<(&EngineConfig, &ModuleConfig)> {
        if let Some((engine, module)) = name.split_once(':') {
            let engine = self.find_engine(engine)?;
            return engine.modules.get(module).map(|m| (engine, m));
        }
        self.engines
            .iter()
            .find_map(|e| e.modules.get(name).map(|m| (e, m)))
    }
}

/// Reads descriptors from the storage layout
#[derive(Debug, Clone)]
pub struct ConfigStore {
    layout: StorageLayout,
}

impl ConfigStore {
    pub fn new(layout: StorageLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Load the global file; a missing file means all defaults
    pub async fn load_global(&self) -> Result<GlobalConfig, LaunchpadError> {
        let file = self.layout.global_config_file();
        if !file.exists().await {
            debug!("No global config at {}, using defaults", file.path().display());
            return Ok(GlobalConfig::default());
        }
        let raw = file.read_string().await?;
        GlobalConfig::parse(&raw, file.path())
    }

    pub async fn load_apps(&self, global: &GlobalConfig) -> Result<LoadReport<AppConfig>, LaunchpadError> {
        let report = load_dir(&self.layout.apps_config_dir(), |raw, path| {
            AppConfig::parse(raw, path, global)
        })
        .await?;
        Ok(dedup(report, |a| a.name.clone(), "application"))
    }

    pub async fn load_engines(&self, global: &GlobalConfig) -> Result<LoadReport<EngineConfig>, LaunchpadError> {
        let report = load_dir(&self.layout.engines_config_dir(), |raw, path| {
            EngineConfig::parse(raw, path, global)
        })
        .await?;
        Ok(dedup(report, |e| e.name.clone(), "engine"))
    }

    /// Load global settings and every descriptor
    pub async fn snapshot(&self) -> Result<ConfigSnapshot, LaunchpadError> {
        let global = self.load_global().await?;
        let apps = self.load_apps(&global).await?;
        let engines = self.load_engines(&global).await?;

        let mut failures = apps.failures;
        failures.extend(engines.failures);

        Ok(ConfigSnapshot {
            global,
            apps: apps.items,
            engines: engines.items,
            failures,
        })
    }
}

#[async_trait]
impl PinnedPorts for ConfigStore {
    async fn pinned_ports(&self) -> Result<BTreeSet<u16>, LaunchpadError> {
        let snapshot = self.snapshot().await?;

        let mut ports: BTreeSet<u16> = snapshot.apps.iter().filter_map(|a| a.port).collect();
        for engine in &snapshot.engines {
            ports.extend(engine.pinned_ports());
        }
        Ok(ports)
    }
}

async fn load_dir<T, F>(dir: &Dir, parse: F) -> Result<LoadReport<T>, LaunchpadError>
where
    F: Fn(&str, &Path) -> Result<T, LaunchpadError>,
{
    let mut report = LoadReport::default();

    for path in dir.list_files_with_ext(DESCRIPTOR_EXTENSIONS).await? {
        let parsed = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => parse(&raw, &path),
            Err(e) => Err(LaunchpadError::ValidationError {
                file: path.clone(),
                message: e.to_string(),
            }),
        };

        match parsed {
            Ok(item) => report.items.push(item),
            Err(e) => {
                warn!("Skipping descriptor: {}", e);
                report.failures.push(e);
            }
        }
    }

    Ok(report)
}

fn dedup<T>(report: LoadReport<T>, key: impl Fn(&T) -> String, kind: &str) -> LoadReport<T> {
    let mut seen = HashSet::new();
    let mut out = LoadReport {
        items: Vec::new(),
        failures: report.failures,
    };

    for item in report.items {
        let name = key(&item);
        if seen.insert(name.clone()) {
            out.items.push(item);
        } else {
            warn!("Duplicate {} '{}', keeping the first descriptor", kind, name);
            out.failures.push(LaunchpadError::ConfigError(format!(
                "duplicate {} '{}'",
                kind, name
            )));
        }
    }

    out
}

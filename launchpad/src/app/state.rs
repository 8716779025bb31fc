//! Application state: the wired-up stores, collaborators and dispatcher

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::global::GlobalConfig;
use crate::config::loader::ConfigStore;
use crate::deploy::executor::{DeployStores, Deployer};
use crate::deploy::git::{GitCli, SourceControl};
use crate::deploy::health::HealthStore;
use crate::deploy::history::HistoryStore;
use crate::deploy::supervisor::{Pm2, ProcessSupervisor};
use crate::dispatch::trigger::Dispatcher;
use crate::errors::LaunchpadError;
use crate::ports::allocator::PortAllocator;
use crate::storage::layout::StorageLayout;

/// Main application state
pub struct AppState {
    pub layout: StorageLayout,

    /// Global settings as loaded at startup
    pub global: GlobalConfig,

    /// Trigger entry point, owns the deployer
    pub dispatcher: Dispatcher,
}

impl AppState {
    /// Wire the state with the git CLI and pm2
    pub async fn init(layout: &StorageLayout) -> Result<Self, LaunchpadError> {
        let config = ConfigStore::new(layout.clone());
        let global = config.load_global().await?;
        let source: Arc<dyn SourceControl> = Arc::new(GitCli::new(global.git.ssh_key.clone()));
        let supervisor: Arc<dyn ProcessSupervisor> = Arc::new(Pm2::default());

        Self::with_collaborators(layout, global, source, supervisor).await
    }

    /// Wire the state around the given collaborators
    pub async fn with_collaborators(
        layout: &StorageLayout,
        global: GlobalConfig,
        source: Arc<dyn SourceControl>,
        supervisor: Arc<dyn ProcessSupervisor>,
    ) -> Result<Self, LaunchpadError> {
        layout.setup().await?;
        let config = ConfigStore::new(layout.clone());

        let ports = Arc::new(PortAllocator::new(
            layout.ports_file(),
            global.ports.clone(),
            Arc::new(config.clone()),
        ));
        let stores = DeployStores {
            ports,
            history: Arc::new(HistoryStore::new(layout.deployments_file())),
            health: Arc::new(HealthStore::new(layout.health_file())),
            logs_dir: layout.deployment_logs_dir(),
        };
        let deployer = Arc::new(Deployer::new(source, supervisor, stores)?);

        if global.deployment.rollback_on_failure {
            warn!("deployment.rollback_on_failure is set, but rollback is not performed");
        }
        info!("Using storage at {}", layout.base_dir.display());

        Ok(Self {
            layout: layout.clone(),
            global,
            dispatcher: Dispatcher::new(config, deployer),
        })
    }
}

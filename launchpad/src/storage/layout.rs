//! Storage layout configuration

use std::path::PathBuf;

use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// On-disk layout for descriptors, state documents and logs
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Directory holding all YAML descriptors
    pub fn config_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("config"))
    }

    /// Global settings file
    pub fn global_config_file(&self) -> File {
        self.config_dir().file("global.yaml")
    }

    /// Application descriptors
    pub fn apps_config_dir(&self) -> Dir {
        self.config_dir().subdir("apps")
    }

    /// Engine descriptors
    pub fn engines_config_dir(&self) -> Dir {
        self.config_dir().subdir("engines")
    }

    /// Directory for the persisted state documents
    pub fn state_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("state"))
    }

    /// Port allocation document
    pub fn ports_file(&self) -> File {
        self.state_dir().file("ports.json")
    }

    /// Deployment history document
    pub fn deployments_file(&self) -> File {
        self.state_dir().file("deployments.json")
    }

    /// Health document
    pub fn health_file(&self) -> File {
        self.state_dir().file("health.json")
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Per-attempt deployment logs, one subdirectory per target
    pub fn deployment_logs_dir(&self) -> Dir {
        self.logs_dir().subdir("deployments")
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), crate::errors::LaunchpadError> {
        self.apps_config_dir().create().await?;
        self.engines_config_dir().create().await?;
        self.state_dir().create().await?;
        self.deployment_logs_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        #[cfg(target_os = "linux")]
        let base_dir = PathBuf::from("/etc/launchpad");

        #[cfg(not(target_os = "linux"))]
        let base_dir = crate::utils::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".launchpad");

        Self::new(base_dir)
    }
}

//! Application configuration options

use std::time::Duration;

use crate::storage::layout::StorageLayout;

/// Main application options
#[derive(Debug, Clone, Default)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage configuration
    pub storage: StorageOptions,

    /// Overrides for the webhook listener; `None` fields fall back to the
    /// `webhook` block of the global config
    pub server: ServerOverrides,
}

/// Lifecycle options for the daemon
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// How long running deployments may take to finish on shutdown
    pub deployment_drain_timeout: Duration,

    /// Maximum delay for graceful shutdown, deployments included
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            deployment_drain_timeout: Duration::from_secs(60),
            max_shutdown_delay: Duration::from_secs(90),
        }
    }
}

/// Storage configuration options
#[derive(Debug, Clone, Default)]
pub struct StorageOptions {
    /// Storage layout paths
    pub layout: StorageLayout,
}

/// Command-line overrides for the listener
#[derive(Debug, Clone, Default)]
pub struct ServerOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// Webhook server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9000,
        }
    }
}

//! Webhook daemon run loop

use std::future::Future;
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::app::options::{AppOptions, LifecycleOptions, ServerOptions};
use crate::app::state::AppState;
use crate::dispatch::trigger::Dispatcher;
use crate::errors::LaunchpadError;
use crate::server::serve::serve;
use crate::server::state::ServerState;

/// Run the webhook daemon until `shutdown_signal` resolves
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), LaunchpadError> {
    info!("Initializing launchpad...");

    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    if let Err(e) = init(&options, &mut shutdown_manager, shutdown_tx.subscribe()).await {
        error!("Failed to start launchpad: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    shutdown_manager: &mut ShutdownManager,
    shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), LaunchpadError> {
    let state = AppState::init(&options.storage.layout).await?;

    let secret = state.global.webhook.secret.expose_secret();
    if secret.is_empty() {
        warn!("webhook.secret is empty, every webhook request will be rejected");
    }

    let server_options = ServerOptions {
        host: options
            .server
            .host
            .clone()
            .unwrap_or_else(|| state.global.webhook.host.clone()),
        port: options.server.port.unwrap_or(state.global.webhook.port),
    };

    let server_state = ServerState::new(
        state.dispatcher.clone(),
        SecretString::from(secret.to_string()),
    );
    shutdown_manager.with_dispatcher(state.dispatcher.clone())?;

    init_webhook_server(&server_options, server_state, shutdown_manager, shutdown_rx).await
}

async fn init_webhook_server(
    options: &ServerOptions,
    server_state: ServerState,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), LaunchpadError> {
    info!("Initializing webhook server...");

    let server_handle = serve(options, Arc::new(server_state), async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_webhook_server_handle(server_handle)?;
    Ok(())
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    dispatcher: Option<Dispatcher>,
    webhook_server_handle: Option<JoinHandle<Result<(), LaunchpadError>>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            dispatcher: None,
            webhook_server_handle: None,
        }
    }

    pub fn with_dispatcher(&mut self, dispatcher: Dispatcher) -> Result<(), LaunchpadError> {
        if self.dispatcher.is_some() {
            return Err(LaunchpadError::ShutdownError("dispatcher already set".to_string()));
        }
        self.dispatcher = Some(dispatcher);
        Ok(())
    }

    pub fn with_webhook_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), LaunchpadError>>,
    ) -> Result<(), LaunchpadError> {
        if self.webhook_server_handle.is_some() {
            return Err(LaunchpadError::ShutdownError("server_handle already set".to_string()));
        }
        self.webhook_server_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), LaunchpadError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(LaunchpadError::ShutdownError(format!(
                "shutdown timed out after {:?}",
                self.lifecycle_options.max_shutdown_delay
            ))),
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), LaunchpadError> {
        info!("Shutting down launchpad...");

        // 1. Stop accepting webhooks
        if let Some(handle) = self.webhook_server_handle.take() {
            handle
                .await
                .map_err(|e| LaunchpadError::ShutdownError(e.to_string()))??;
        }

        // 2. Let running deployments finish
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher
                .drain(self.lifecycle_options.deployment_drain_timeout)
                .await?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}

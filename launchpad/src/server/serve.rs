//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::LaunchpadError;
use crate::server::handlers::{deploy_handler, health_handler, webhook_handler};
use crate::server::state::ServerState;

/// Routes of the webhook surface
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        // Push webhooks
        .route("/", post(webhook_handler))
        .route("/webhook", post(webhook_handler))
        // Manual deploys
        .route("/deploy/{name}", post(deploy_handler))
        // Liveness
        .route("/health", get(health_handler))
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), LaunchpadError>>, LaunchpadError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting webhook server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| LaunchpadError::ServerError(format!("unable to bind {}: {}", addr, e)))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| LaunchpadError::ServerError(e.to_string()))
    });

    Ok(handle)
}

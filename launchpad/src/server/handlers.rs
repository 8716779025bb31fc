//! HTTP request handlers

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use hook_models::models::{ErrorResponse, HealthResponse, HookResponse, PushEvent};
use tracing::{debug, error, info, warn};

use crate::dispatch::trigger::PushOutcome;
use crate::errors::LaunchpadError;
use crate::server::signature::{verify, SIGNATURE_HEADER};
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Event type headers of hosts that sign with `X-Hub-Signature-256`
const EVENT_HEADERS: &[&str] = &["x-github-event", "x-gitea-event"];

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorResponse { error: message.into() })).into_response()
}

fn ignored(message: impl Into<String>) -> Response {
    (StatusCode::OK, Json(HookResponse::ignored(message))).into_response()
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Signature failures reveal nothing about configured targets
fn authenticate(state: &ServerState, headers: &HeaderMap, body: &[u8]) -> Result<(), Response> {
    verify(&state.secret, body, header(headers, SIGNATURE_HEADER)).map_err(|e| {
        warn!("Rejected request: {}", e);
        error_response(StatusCode::UNAUTHORIZED, "invalid signature")
    })
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "launchpad".to_string(),
        version: version.version,
    })
}

/// Push webhook handler
pub async fn webhook_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(rejected) = authenticate(&state, &headers, &body) {
        return rejected;
    }

    let event = EVENT_HEADERS.iter().find_map(|name| header(&headers, name));
    match event {
        Some("push") => {}
        Some(other) => {
            debug!("Ignoring {} event", other);
            return ignored(format!("event '{}' ignored", other));
        }
        None => return ignored("no event type"),
    }

    let push: PushEvent = match serde_json::from_slice(&body) {
        Ok(push) => push,
        Err(e) => {
            warn!("Malformed push payload: {}", e);
            return error_response(StatusCode::BAD_REQUEST, format!("malformed payload: {}", e));
        }
    };

    match state.dispatcher.enqueue_push(&push).await {
        Ok(PushOutcome::Accepted(targets)) => {
            info!("Accepted push to {}: {}", push.repository.full_name, targets.join(", "));
            (
                StatusCode::OK,
                Json(HookResponse::accepted(targets.join(", "), "deployment queued")),
            )
                .into_response()
        }
        Ok(PushOutcome::NoMatch) => ignored("no matching target"),
        Ok(PushOutcome::BranchMismatch(branch)) => ignored(format!("branch '{}' is not deployed", branch)),
        Ok(PushOutcome::NotABranch(git_ref)) => ignored(format!("ref '{}' is not a branch", git_ref)),
        Err(e) => {
            error!("Unable to dispatch push: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "unable to dispatch")
        }
    }
}

/// Manual deploy handler, applications only
pub async fn deploy_handler(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(rejected) = authenticate(&state, &headers, &body) {
        return rejected;
    }

    match state.dispatcher.enqueue_app(&name).await {
        Ok(target) => (
            StatusCode::OK,
            Json(HookResponse::accepted(target, "deployment queued")),
        )
            .into_response(),
        Err(LaunchpadError::TargetNotFound(name)) => {
            error_response(StatusCode::NOT_FOUND, format!("application '{}' not found", name))
        }
        Err(e) => {
            error!("Unable to enqueue {}: {}", name, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "unable to dispatch")
        }
    }
}

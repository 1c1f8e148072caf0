//! Admin API for credential management
//!
//! Runs on a separate listener (default 127.0.0.1:9090) and is never exposed
//! next to the generation API.
//!
//! Endpoints:
//! - GET    /admin/pool                       pool stats with per-credential summaries
//! - POST   /admin/pool/reload                rescan the credential directory
//! - POST   /admin/credentials                add a credential from a pasted cookie
//! - DELETE /admin/credentials/{id}           remove a credential and its file
//! - POST   /admin/credentials/{id}/refresh   refresh one credential now
//!
//! `{id}` accepts the full identity or the masked prefix shown by /admin/pool.

use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use flow_pool::Pool;
use serde::Deserialize;
use tracing::{info, warn};

/// Shared state for admin API handlers.
#[derive(Clone)]
pub struct AdminState {
    pool: Arc<Pool>,
}

impl AdminState {
    pub fn new(pool: Arc<Pool>) -> Self {
        Self { pool }
    }
}

/// Build the admin axum router with all credential management endpoints.
pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/pool", get(pool_status))
        .route("/admin/pool/reload", post(reload_pool))
        .route("/admin/credentials", post(add_credential))
        .route("/admin/credentials/{id}", delete(remove_credential))
        .route("/admin/credentials/{id}/refresh", post(refresh_credential))
        .with_state(state)
}

fn json_response(status: StatusCode, body: serde_json::Value) -> impl IntoResponse {
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Status code for a pool error surfaced to an operator.
fn pool_error_status(error: &flow_pool::Error) -> StatusCode {
    match error {
        flow_pool::Error::DuplicateCredential(_) => StatusCode::CONFLICT,
        flow_pool::Error::NoSecretFound => StatusCode::BAD_REQUEST,
        flow_pool::Error::NotFound(_) => StatusCode::NOT_FOUND,
        flow_pool::Error::NoneAvailable => StatusCode::SERVICE_UNAVAILABLE,
        flow_pool::Error::RefreshFailed(_) => StatusCode::BAD_GATEWAY,
        flow_pool::Error::Store(_) | flow_pool::Error::Watch(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn pool_error_response(error: flow_pool::Error) -> axum::response::Response {
    let status = pool_error_status(&error);
    json_response(status, serde_json::json!({ "error": error.to_string() })).into_response()
}

/// GET /admin/pool. Never exposes secrets or access tokens.
async fn pool_status(State(state): State<AdminState>) -> impl IntoResponse {
    let stats = state.pool.stats().await;
    json_response(StatusCode::OK, serde_json::json!(stats))
}

/// POST /admin/pool/reload
async fn reload_pool(State(state): State<AdminState>) -> axum::response::Response {
    match state.pool.load().await {
        Ok(loaded) => {
            let total = state.pool.count().await;
            info!(loaded, total, "credential directory reloaded");
            json_response(
                StatusCode::OK,
                serde_json::json!({ "loaded": loaded, "total": total }),
            )
            .into_response()
        }
        Err(e) => {
            warn!(error = %e, "credential directory reload failed");
            pool_error_response(e)
        }
    }
}

/// Request body for the add endpoint.
#[derive(Deserialize)]
struct AddCredentialRequest {
    /// Cookie header, cookie-editor export or bare session token.
    cookie: String,
}

/// POST /admin/credentials
///
/// The first access token is fetched in the background, so a bad cookie
/// shows up as an errored credential in /admin/pool rather than here.
async fn add_credential(
    State(state): State<AdminState>,
    axum::Json(body): axum::Json<AddCredentialRequest>,
) -> axum::response::Response {
    match state.pool.add_from_raw_input(&body.cookie).await {
        Ok(id) => json_response(
            StatusCode::CREATED,
            serde_json::json!({ "id": common::mask(&id), "status": "added" }),
        )
        .into_response(),
        Err(e) => {
            warn!(error = %e, "credential add rejected");
            pool_error_response(e)
        }
    }
}

/// DELETE /admin/credentials/{id}
async fn remove_credential(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> axum::response::Response {
    match state.pool.remove(&id).await {
        Ok(()) => json_response(
            StatusCode::OK,
            serde_json::json!({ "id": id, "status": "removed" }),
        )
        .into_response(),
        Err(e) => pool_error_response(e),
    }
}

/// POST /admin/credentials/{id}/refresh
async fn refresh_credential(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let outcome = state.pool.refresh(&id).await;
    match outcome {
        Ok(()) => match state.pool.get(&id).await {
            Ok(credential) => {
                json_response(StatusCode::OK, serde_json::json!(credential.summary().await))
                    .into_response()
            }
            Err(e) => pool_error_response(e),
        },
        Err(e) => pool_error_response(e),
    }
}

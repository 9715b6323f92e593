//! HTTP surface.
//!
//! Browser-facing routes drive the OAuth flow; `/auth/status` serves the
//! authorization snapshot; `/internal/token/{service}` is the request/response
//! interface the agent process uses to obtain valid access tokens. Callback
//! responses never echo authorization codes or tokens.

use crate::error::AuthError;
use crate::oauth::FlowEngine;
use crate::provider::{CredentialProvider, IssuedToken};
use crate::service::Service;
use crate::status::StatusAggregator;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Json, Redirect, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<FlowEngine>,
    pub provider: Arc<CredentialProvider>,
    pub status: Arc<StatusAggregator>,
    pub post_auth_redirect: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reference: Option<Uuid>,
}

/// Error type for the JSON endpoints.
enum AppError {
    BadRequest(String),
    NotAuthorized,
    BadGateway(Uuid),
    ServerError(Uuid),
}

impl AppError {
    /// Log the underlying failure under a correlation id; the response body
    /// stays generic.
    fn from_auth_error(err: AuthError, endpoint: &'static str) -> Self {
        match err {
            AuthError::InvalidService => AppError::BadRequest("unknown service".to_string()),
            AuthError::UnknownOrExpiredState => {
                AppError::BadRequest("unknown or expired authorization state".to_string())
            }
            AuthError::NotAuthorized => AppError::NotAuthorized,
            AuthError::TokenExchangeFailed(message) | AuthError::RefreshFailed(message) => {
                let reference = Uuid::new_v4();
                error!(%reference, endpoint, error = %message, "Upstream provider failure");
                AppError::BadGateway(reference)
            }
            AuthError::Internal(e) => {
                let reference = Uuid::new_v4();
                error!(%reference, endpoint, error = %e, "Internal failure");
                AppError::ServerError(reference)
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, reference) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            AppError::NotAuthorized => (
                StatusCode::UNAUTHORIZED,
                "re-authorization required".to_string(),
                None,
            ),
            AppError::BadGateway(reference) => (
                StatusCode::BAD_GATEWAY,
                "upstream authorization provider error".to_string(),
                Some(reference),
            ),
            AppError::ServerError(reference) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error".to_string(),
                Some(reference),
            ),
        };

        (status, Json(ErrorResponse { error, reference })).into_response()
    }
}

/// User-visible error page for the browser-facing callback route.
/// Messages never contain codes, tokens, or provider error bodies.
fn error_page(status: StatusCode, message: &str) -> Response {
    let body = format!(
        "<!DOCTYPE html>\n<html>\n<head><title>Authorization error</title></head>\n\
         <body><h1>Authorization error</h1><p>{}</p></body>\n</html>",
        message
    );
    (status, Html(body)).into_response()
}

#[derive(Deserialize)]
struct UserQuery {
    user_id: Option<String>,
}

/// Callback query parameters as sent by the provider.
#[derive(Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Serialize)]
struct LivenessResponse {
    status: &'static str,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(liveness))
        .route("/auth/status", get(auth_status))
        .route("/internal/token/:service", get(internal_token))
        .route("/:service/auth", get(auth_start))
        .route("/:service/callback", get(auth_callback))
        .with_state(Arc::new(state))
}

/// GET / — liveness probe.
async fn liveness() -> Json<LivenessResponse> {
    Json(LivenessResponse { status: "running" })
}

/// GET /{service}/auth?user_id= — 307 to the provider authorization URL.
async fn auth_start(
    State(state): State<Arc<AppState>>,
    Path(service): Path<String>,
    Query(query): Query<UserQuery>,
) -> Result<Redirect, AppError> {
    let service = service
        .parse()
        .map_err(|e| AppError::from_auth_error(e, "auth_start"))?;

    let user_id = query
        .user_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::BadRequest("missing user_id".to_string()))?;

    let url = state
        .engine
        .begin_authorization(&user_id, service)
        .map_err(|e| AppError::from_auth_error(e, "auth_start"))?;

    Ok(Redirect::temporary(&url))
}

/// GET /{service}/callback — completes a flow and sends the browser to the
/// configured post-auth destination.
async fn auth_callback(
    State(state): State<Arc<AppState>>,
    Path(service): Path<String>,
    Query(params): Query<CallbackParams>,
) -> Response {
    let Ok(service) = service.parse::<Service>() else {
        return error_page(StatusCode::BAD_REQUEST, "Unknown service.");
    };

    if let Some(provider_error) = params.error {
        warn!(
            service = %service,
            error = %provider_error,
            description = params.error_description.as_deref().unwrap_or("none"),
            "Provider reported an authorization error"
        );
        return error_page(
            StatusCode::BAD_REQUEST,
            "The authorization request was denied or failed. Please try again.",
        );
    }

    let (Some(code), Some(csrf_state)) = (params.code, params.state) else {
        return error_page(StatusCode::BAD_REQUEST, "Missing callback parameters.");
    };

    match state.engine.handle_callback(service, &csrf_state, &code).await {
        Ok((user_id, _)) => {
            info!(user_id = %user_id, service = %service, "Callback completed");
            Redirect::temporary(&state.post_auth_redirect).into_response()
        }
        Err(AuthError::UnknownOrExpiredState) => error_page(
            StatusCode::BAD_REQUEST,
            "This authorization link is no longer valid. Please restart the connection flow.",
        ),
        Err(AuthError::TokenExchangeFailed(message)) => {
            let reference = Uuid::new_v4();
            error!(%reference, service = %service, error = %message, "Token exchange failed");
            error_page(
                StatusCode::BAD_GATEWAY,
                &format!(
                    "The authorization provider rejected the request. Reference: {}",
                    reference
                ),
            )
        }
        Err(e) => {
            let reference = Uuid::new_v4();
            error!(%reference, service = %service, error = %e, "Callback failed");
            error_page(
                StatusCode::INTERNAL_SERVER_ERROR,
                &format!("Something went wrong. Reference: {}", reference),
            )
        }
    }
}

/// GET /auth/status?user_id= — per-service authorization snapshot.
async fn auth_status(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UserQuery>,
) -> Result<Json<BTreeMap<&'static str, bool>>, AppError> {
    let user_id = query
        .user_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::BadRequest("missing user_id".to_string()))?;

    let statuses = state
        .status
        .status_for(&user_id)
        .map_err(|e| AppError::from_auth_error(AuthError::Internal(e), "auth_status"))?;

    Ok(Json(statuses))
}

/// GET /internal/token/{service}?user_id= — valid access token for the agent
/// process, refreshed transparently if stale.
async fn internal_token(
    State(state): State<Arc<AppState>>,
    Path(service): Path<String>,
    Query(query): Query<UserQuery>,
) -> Result<Json<IssuedToken>, AppError> {
    let service = service
        .parse()
        .map_err(|e| AppError::from_auth_error(e, "internal_token"))?;

    let user_id = query
        .user_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::BadRequest("missing user_id".to_string()))?;

    let token = state
        .provider
        .get_valid_token(&user_id, service)
        .await
        .map_err(|e| AppError::from_auth_error(e, "internal_token"))?;

    Ok(Json(token))
}

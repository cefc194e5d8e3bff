// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Spotify OAuth authentication routes.

use axum::{
    extract::{Query, State},
    response::Redirect,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

use crate::error::{AppError, Result};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/login", get(auth_start))
        .route("/auth/callback", post(auth_callback))
}

/// Query parameters for starting OAuth flow.
#[derive(Deserialize)]
pub struct AuthStartParams {
    /// Opaque value echoed back by Spotify to the frontend.
    #[serde(default)]
    state: Option<String>,
    /// Overrides the configured redirect URI.
    #[serde(default)]
    redirect_uri: Option<String>,
}

/// Start OAuth flow - redirect to Spotify authorization.
async fn auth_start(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AuthStartParams>,
) -> Redirect {
    let redirect_uri = params
        .redirect_uri
        .unwrap_or_else(|| state.config.spotify_redirect_uri.clone());
    let url = state
        .spotify
        .client()
        .authorize_url(&redirect_uri, params.state.as_deref());

    tracing::debug!(redirect_uri = %redirect_uri, "Redirecting to Spotify authorization");
    Redirect::temporary(&url)
}

/// Body posted by the frontend once Spotify has redirected back to it.
#[derive(Deserialize, Validate)]
pub struct CallbackRequest {
    #[validate(
        required(message = "Code parameter is required"),
        length(min = 1, message = "Code parameter is required")
    )]
    code: Option<String>,
    /// Requested handle; ignored when malformed or taken.
    #[serde(default)]
    custom_url: Option<String>,
    #[serde(default)]
    #[validate(url)]
    redirect_uri: Option<String>,
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct CallbackResponse {
    pub success: bool,
    /// Handle to use in `/users/{handle}` URLs.
    pub user_id: String,
}

/// OAuth callback - exchange the code and create or update the account.
async fn auth_callback(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CallbackRequest>,
) -> Result<Json<CallbackResponse>> {
    body.validate()?;

    let code = body
        .code
        .as_deref()
        .ok_or_else(|| AppError::BadRequest("Code parameter is required".to_string()))?;
    let redirect_uri = body
        .redirect_uri
        .as_deref()
        .unwrap_or(&state.config.spotify_redirect_uri);

    let result = state
        .spotify
        .handle_oauth_callback(code, redirect_uri, body.custom_url.as_deref())
        .await
        .map_err(|e| match e {
            // A rejected authorization code is the caller's problem.
            AppError::ReauthRequired(reason) => {
                AppError::BadRequest(format!("Failed to get token: {}", reason))
            }
            other => other,
        })?;

    tracing::info!(
        account_id = %result.account_id,
        display_name = %result.display_name,
        "Account connected"
    );

    Ok(Json(CallbackResponse {
        success: true,
        user_id: result.custom_url,
    }))
}

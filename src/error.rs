// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// The provider rejected the stored refresh token. The account must go
    /// through the authorization flow again; retrying will not help.
    #[error("Re-authorization required: {0}")]
    ReauthRequired(String),

    /// A resource call was rejected with 401 despite a fresh-looking token.
    #[error("Spotify rejected the access token")]
    SpotifyUnauthorized,

    #[error("Spotify rate limit hit")]
    RateLimited { retry_after_secs: Option<u64> },

    /// Network failure, timeout or 5xx from Spotify.
    #[error("Spotify unavailable: {0}")]
    SpotifyUnavailable(String),

    #[error("Spotify API error: {0}")]
    SpotifyApi(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Whether the failure is worth retrying at the transport level.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::RateLimited { .. } | AppError::SpotifyUnavailable(_)
        )
    }

    pub fn is_reauth_required(&self) -> bool {
        matches!(self, AppError::ReauthRequired(_))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::BadRequest(errors.to_string())
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", Some(msg.clone())),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", Some(msg.clone()))
            }
            AppError::ReauthRequired(_) => (StatusCode::UNAUTHORIZED, "reauth_required", None),
            AppError::SpotifyUnauthorized => {
                (StatusCode::BAD_GATEWAY, "spotify_unauthorized", None)
            }
            AppError::RateLimited { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "rate_limited", None)
            }
            AppError::SpotifyUnavailable(msg) | AppError::SpotifyApi(msg) => {
                (StatusCode::BAD_GATEWAY, "spotify_error", Some(msg.clone()))
            }
            AppError::Database(msg) => {
                tracing::error!(error = %msg, "Database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;

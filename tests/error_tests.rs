// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use axum::http::StatusCode;
use axum::response::IntoResponse;
use spotify_sync::error::AppError;

async fn render(err: AppError) -> (StatusCode, serde_json::Value) {
    let response = err.into_response();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1024)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[test]
fn test_transient_errors() {
    assert!(AppError::SpotifyUnavailable("HTTP 503".to_string()).is_transient());
    assert!(AppError::RateLimited {
        retry_after_secs: Some(3)
    }
    .is_transient());

    assert!(!AppError::SpotifyUnauthorized.is_transient());
    assert!(!AppError::ReauthRequired("invalid_grant".to_string()).is_transient());
    assert!(!AppError::SpotifyApi("HTTP 404".to_string()).is_transient());
    assert!(!AppError::Database("down".to_string()).is_transient());
}

#[tokio::test]
async fn test_reauth_required_response() {
    let (status, body) = render(AppError::ReauthRequired("invalid_grant".to_string())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "reauth_required");
    assert!(body.get("details").is_none());
}

#[tokio::test]
async fn test_internal_details_are_not_leaked() {
    let (status, body) = render(AppError::Database("connection string xyz".to_string())).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "database_error");
    assert!(body.get("details").is_none());

    let (status, _) = render(AppError::Internal(anyhow::anyhow!("boom"))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_upstream_errors_map_to_gateway_statuses() {
    let (status, body) = render(AppError::SpotifyApi("HTTP 404: gone".to_string())).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["details"], "HTTP 404: gone");

    let (status, _) = render(AppError::RateLimited {
        retry_after_secs: None,
    })
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

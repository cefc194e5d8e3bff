// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.
//!
//! A `.env` file is honoured for local development. Everything except the
//! Spotify client credentials has a default.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Which persistence backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Firestore,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "firestore" => Ok(Self::Firestore),
            "memory" => Ok(Self::Memory),
            _ => Err(ConfigError::Invalid("STORE_BACKEND", s.to_string())),
        }
    }
}

/// Period and staleness threshold for one scheduled sync job.
#[derive(Debug, Clone, Copy)]
pub struct JobTiming {
    /// How often the job fires.
    pub interval: Duration,
    /// How old a resource's last sync must be before the account is due again.
    pub resync_after: Duration,
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Spotify OAuth ---
    /// Spotify OAuth client ID (public)
    pub spotify_client_id: String,
    /// Spotify OAuth client secret
    pub spotify_client_secret: String,
    /// Redirect URI registered with Spotify, used when the callback body omits one
    pub spotify_redirect_uri: String,
    /// Base URL of the Web API (no trailing slash)
    pub spotify_api_url: String,
    /// Base URL of the accounts service (no trailing slash)
    pub spotify_accounts_url: String,

    // --- Server ---
    /// Frontend URL allowed by CORS
    pub frontend_url: String,
    /// Server port
    pub port: u16,

    // --- Storage ---
    pub store_backend: StoreBackend,
    /// GCP project ID (Firestore backend only)
    pub gcp_project_id: String,

    // --- Token and transport behaviour ---
    /// Refresh access tokens this long before they actually expire.
    pub token_refresh_margin: Duration,
    /// Total attempts per outbound call, including the first.
    pub http_max_attempts: u32,
    pub http_retry_base: Duration,
    pub http_retry_max: Duration,

    // --- Sync ---
    /// Maximum pages followed per resource per cycle.
    pub sync_max_pages: u32,
    /// Accounts processed concurrently within one cycle.
    pub sync_concurrency: usize,
    pub recent_tracks_job: JobTiming,
    pub top_items_job: JobTiming,
    pub playlists_job: JobTiming,
}

impl Config {
    /// Default config for testing only.
    pub fn test_default() -> Self {
        Self {
            spotify_client_id: "test_client_id".to_string(),
            spotify_client_secret: "test_secret".to_string(),
            spotify_redirect_uri: "http://localhost:5173/callback".to_string(),
            spotify_api_url: "http://127.0.0.1:9/v1".to_string(),
            spotify_accounts_url: "http://127.0.0.1:9".to_string(),
            frontend_url: "http://localhost:5173".to_string(),
            port: 8080,
            store_backend: StoreBackend::Memory,
            gcp_project_id: "test-project".to_string(),
            token_refresh_margin: Duration::from_secs(300),
            http_max_attempts: 3,
            http_retry_base: Duration::from_millis(5),
            http_retry_max: Duration::from_millis(20),
            sync_max_pages: 4,
            sync_concurrency: 1,
            recent_tracks_job: JobTiming {
                interval: Duration::from_secs(60),
                resync_after: Duration::from_secs(15 * 60),
            },
            top_items_job: JobTiming {
                interval: Duration::from_secs(60),
                resync_after: Duration::from_secs(60 * 60),
            },
            playlists_job: JobTiming {
                interval: Duration::from_secs(5 * 60),
                resync_after: Duration::from_secs(5 * 60),
            },
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        Ok(Self {
            spotify_client_id: env::var("SPOTIFY_CLIENT_ID")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("SPOTIFY_CLIENT_ID"))?,
            spotify_client_secret: env::var("SPOTIFY_CLIENT_SECRET")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("SPOTIFY_CLIENT_SECRET"))?,
            spotify_redirect_uri: env::var("SPOTIFY_REDIRECT_URI")
                .unwrap_or_else(|_| "http://localhost:5173/callback".to_string()),
            spotify_api_url: trimmed_url("SPOTIFY_API_URL", "https://api.spotify.com/v1"),
            spotify_accounts_url: trimmed_url(
                "SPOTIFY_ACCOUNTS_URL",
                "https://accounts.spotify.com",
            ),
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            port: parse_var("PORT", 8080)?,
            store_backend: parse_var("STORE_BACKEND", StoreBackend::Firestore)?,
            gcp_project_id: env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string()),
            token_refresh_margin: secs_var("TOKEN_REFRESH_MARGIN_SECS", 5 * 60)?,
            http_max_attempts: parse_var::<u32>("HTTP_MAX_ATTEMPTS", 3)?.max(1),
            http_retry_base: Duration::from_millis(parse_var("HTTP_RETRY_BASE_MS", 4_000)?),
            http_retry_max: Duration::from_millis(parse_var("HTTP_RETRY_MAX_MS", 10_000)?),
            sync_max_pages: parse_var::<u32>("SYNC_MAX_PAGES", 4)?.max(1),
            sync_concurrency: parse_var::<usize>("SYNC_CONCURRENCY", 1)?.max(1),
            recent_tracks_job: JobTiming {
                interval: secs_var("RECENT_TRACKS_INTERVAL_SECS", 60)?,
                resync_after: secs_var("RECENT_TRACKS_RESYNC_SECS", 15 * 60)?,
            },
            top_items_job: JobTiming {
                interval: secs_var("TOP_ITEMS_INTERVAL_SECS", 60)?,
                resync_after: secs_var("TOP_ITEMS_RESYNC_SECS", 60 * 60)?,
            },
            playlists_job: JobTiming {
                interval: secs_var("PLAYLISTS_INTERVAL_SECS", 5 * 60)?,
                resync_after: secs_var("PLAYLISTS_RESYNC_SECS", 5 * 60)?,
            },
        })
    }
}

fn trimmed_url(name: &'static str, default: &str) -> String {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .trim_end_matches('/')
        .to_string()
}

/// Parse an optional variable, falling back to `default` when unset.
fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(name, raw)),
        Err(_) => Ok(default),
    }
}

fn secs_var(name: &'static str, default: u64) -> Result<Duration, ConfigError> {
    parse_var(name, default).map(Duration::from_secs)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {0}: {1:?}")]
    Invalid(&'static str, String),
}

// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Spotify API client for OAuth and listening data.
//!
//! Handles:
//! - Authorization code exchange and token refresh
//! - Paginated fetches of history, top items and playlists
//! - Transport retry for rate limits and transient failures
//! - Token lifecycle (cache, per-account refresh locks, one retry on 401)

use crate::config::Config;
use crate::error::AppError;
use crate::models::ResourceKind;
use crate::services::payload::{CurrentlyPlaying, Page, Profile};
use crate::services::retry::{with_backoff, RetryPolicy};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;

/// Scopes requested during authorization.
pub const OAUTH_SCOPES: &str = "user-read-recently-played user-top-read \
    user-read-currently-playing playlist-read-private user-read-private";

/// Spotify API client.
#[derive(Clone)]
pub struct SpotifyClient {
    http: reqwest::Client,
    api_url: String,
    accounts_url: String,
    client_id: String,
    client_secret: String,
    retry: RetryPolicy,
}

impl SpotifyClient {
    /// Create a new Spotify client from configuration.
    pub fn new(config: &Config) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(20))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });

        Self {
            http,
            api_url: config.spotify_api_url.clone(),
            accounts_url: config.spotify_accounts_url.clone(),
            client_id: config.spotify_client_id.clone(),
            client_secret: config.spotify_client_secret.clone(),
            retry: RetryPolicy {
                max_attempts: config.http_max_attempts,
                base_delay: config.http_retry_base,
                max_delay: config.http_retry_max,
            },
        }
    }

    /// URL the browser is sent to in order to start authorization.
    pub fn authorize_url(&self, redirect_uri: &str, state: Option<&str>) -> String {
        let mut url = format!(
            "{}/authorize?client_id={}&response_type=code&redirect_uri={}&scope={}",
            self.accounts_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(OAUTH_SCOPES),
        );
        if let Some(state) = state {
            url.push_str("&state=");
            url.push_str(&urlencoding::encode(state));
        }
        url
    }

    /// First-page URL for a synced resource.
    pub fn resource_url(&self, kind: ResourceKind) -> String {
        let path = match kind {
            ResourceKind::RecentTracks => "me/player/recently-played?limit=50",
            ResourceKind::TopTracks => "me/top/tracks?limit=50&time_range=short_term",
            ResourceKind::TopArtists => "me/top/artists?limit=50&time_range=short_term",
            ResourceKind::Playlists => "me/playlists?limit=50",
        };
        format!("{}/{}", self.api_url, path)
    }

    // ─── OAuth ───────────────────────────────────────────────────

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse, AppError> {
        self.token_request(
            "exchange_code",
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
            ],
        )
        .await
    }

    /// Refresh an expired access token.
    ///
    /// A rejection of the refresh token itself maps to
    /// [`AppError::ReauthRequired`].
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse, AppError> {
        self.token_request(
            "refresh_token",
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ],
        )
        .await
    }

    async fn token_request(
        &self,
        operation: &str,
        grant: &[(&str, &str)],
    ) -> Result<TokenResponse, AppError> {
        let url = format!("{}/api/token", self.accounts_url);
        let mut form: Vec<(&str, &str)> = grant.to_vec();
        form.push(("client_id", self.client_id.as_str()));
        form.push(("client_secret", self.client_secret.as_str()));

        with_backoff(operation, self.retry, || async {
            let response = self
                .http
                .post(&url)
                .form(&form)
                .send()
                .await
                .map_err(|e| {
                    AppError::SpotifyUnavailable(format!("Token request failed: {}", e))
                })?;

            let status = response.status();
            if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
                let body = response.text().await.unwrap_or_default();
                tracing::warn!(status = %status, body = %body, "Spotify rejected token grant");
                return Err(AppError::ReauthRequired(format!(
                    "Token grant rejected with status {}",
                    status
                )));
            }

            check_response_json(response).await
        })
        .await
    }

    // ─── Resources ───────────────────────────────────────────────

    /// Get the authenticated user's profile.
    pub async fn get_profile(&self, access_token: &str) -> Result<Profile, AppError> {
        let url = format!("{}/me", self.api_url);
        self.get_json(&url, access_token).await
    }

    /// Follow `next` links from `first_url`, collecting raw items from at most
    /// `max_pages` pages.
    pub async fn fetch_pages(
        &self,
        first_url: &str,
        access_token: &str,
        max_pages: u32,
    ) -> Result<Vec<Value>, AppError> {
        let mut items = Vec::new();
        let mut next = Some(first_url.to_string());
        let mut pages = 0;

        while let Some(url) = next.take() {
            if pages >= max_pages {
                tracing::debug!(url = %url, max_pages, "Page cap reached, not following next");
                break;
            }
            let page: Page = self.get_json(&url, access_token).await?;
            pages += 1;
            items.extend(page.items);
            next = page.next;
        }

        Ok(items)
    }

    /// What the user is playing right now; `None` when nothing is.
    pub async fn currently_playing(
        &self,
        access_token: &str,
    ) -> Result<Option<CurrentlyPlaying>, AppError> {
        let url = format!("{}/me/player/currently-playing", self.api_url);

        with_backoff("currently_playing", self.retry, || async {
            let response = self
                .http
                .get(&url)
                .bearer_auth(access_token)
                .send()
                .await
                .map_err(|e| AppError::SpotifyUnavailable(e.to_string()))?;

            if response.status() == StatusCode::NO_CONTENT {
                return Ok(None);
            }
            check_response_json(response).await.map(Some)
        })
        .await
    }

    /// First page of a playlist's tracks.
    pub async fn playlist_tracks(
        &self,
        access_token: &str,
        playlist_id: &str,
    ) -> Result<Vec<Value>, AppError> {
        let url = format!(
            "{}/playlists/{}/tracks?limit=50",
            self.api_url,
            urlencoding::encode(playlist_id)
        );
        self.fetch_pages(&url, access_token, 1).await
    }

    /// Generic GET request with JSON response.
    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        access_token: &str,
    ) -> Result<T, AppError> {
        with_backoff("get_json", self.retry, || async {
            let response = self
                .http
                .get(url)
                .bearer_auth(access_token)
                .send()
                .await
                .map_err(|e| AppError::SpotifyUnavailable(e.to_string()))?;

            check_response_json(response).await
        })
        .await
    }
}

/// Check response status and parse JSON body.
async fn check_response_json<T: for<'de> Deserialize<'de>>(
    response: reqwest::Response,
) -> Result<T, AppError> {
    let status = response.status();
    if !status.is_success() {
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok());
            tracing::warn!(?retry_after_secs, "Spotify rate limit hit (429)");
            return Err(AppError::RateLimited { retry_after_secs });
        }

        let body = response.text().await.unwrap_or_default();

        if status == StatusCode::UNAUTHORIZED {
            return Err(AppError::SpotifyUnauthorized);
        }
        if status.is_server_error() {
            return Err(AppError::SpotifyUnavailable(format!(
                "HTTP {}: {}",
                status, body
            )));
        }
        return Err(AppError::SpotifyApi(format!("HTTP {}: {}", status, body)));
    }

    response
        .json()
        .await
        .map_err(|e| AppError::SpotifyApi(format!("JSON parse error: {}", e)))
}

/// Token response from the accounts service.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime of `access_token` in seconds.
    pub expires_in: i64,
}

impl TokenResponse {
    /// Absolute expiry of `access_token` issued at `now`.
    pub fn expires_at(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, AppError> {
        Duration::try_seconds(self.expires_in)
            .filter(|lifetime| *lifetime > Duration::zero())
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .ok_or_else(|| {
                AppError::SpotifyApi(format!("Invalid token lifetime: {}s", self.expires_in))
            })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SpotifyService - High-level service with token management
// ─────────────────────────────────────────────────────────────────────────────

use crate::db::{Store, TokenSet};
use crate::models::{account::is_valid_custom_url, Account, SyncStamps};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Cached access token with expiry information.
#[derive(Clone)]
pub struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// Shared token cache type for use in AppState.
pub type TokenCache = Arc<DashMap<String, CachedToken>>;

/// Shared refresh locks type for use in AppState.
pub type RefreshLocks = Arc<DashMap<String, Arc<Mutex<()>>>>;

/// High-level Spotify service that manages token lifecycle and API calls.
///
/// This service encapsulates:
/// - Token retrieval from the store
/// - Automatic refresh when expiring (within the configured margin)
/// - In-memory token caching
/// - Per-account locking to prevent duplicate refresh calls
/// - A single refresh-and-retry when Spotify rejects a token mid-window
#[derive(Clone)]
pub struct SpotifyService {
    client: SpotifyClient,
    db: Arc<dyn Store>,
    token_cache: TokenCache,
    refresh_locks: RefreshLocks,
    refresh_margin: Duration,
}

impl SpotifyService {
    pub fn new(config: &Config, db: Arc<dyn Store>) -> Self {
        Self {
            client: SpotifyClient::new(config),
            db,
            token_cache: Arc::new(DashMap::new()),
            refresh_locks: Arc::new(DashMap::new()),
            refresh_margin: crate::time_utils::chrono_duration(config.token_refresh_margin),
        }
    }

    pub fn client(&self) -> &SpotifyClient {
        &self.client
    }

    /// Drop any cached token for the account.
    pub fn invalidate(&self, account_id: &str) {
        self.token_cache.remove(account_id);
    }

    fn refresh_lock(&self, account_id: &str) -> Arc<Mutex<()>> {
        self.refresh_locks
            .entry(account_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn cached(&self, account_id: &str, now: DateTime<Utc>) -> Option<String> {
        self.token_cache.get(account_id).and_then(|cached| {
            (now + self.refresh_margin < cached.expires_at).then(|| cached.access_token.clone())
        })
    }

    fn cache(&self, account_id: &str, access_token: &str, expires_at: DateTime<Utc>) {
        self.token_cache.insert(
            account_id.to_string(),
            CachedToken {
                access_token: access_token.to_string(),
                expires_at,
            },
        );
    }

    // ─── Token Management ────────────────────────────────────────────────────

    /// Get a valid (non-expired) access token for the given account.
    ///
    /// 1. Check in-memory cache (no I/O)
    /// 2. Acquire per-account lock, re-check cache
    /// 3. Load account from the store; use its token if still valid
    /// 4. Otherwise refresh with Spotify and persist the result
    ///
    /// Calling this twice within one expiry window returns the same token
    /// without contacting Spotify.
    pub async fn get_valid_access_token(&self, account_id: &str) -> Result<String, AppError> {
        if let Some(token) = self.cached(account_id, Utc::now()) {
            return Ok(token);
        }

        let lock = self.refresh_lock(account_id);
        let _guard = lock.lock().await;

        let now = Utc::now();
        if let Some(token) = self.cached(account_id, now) {
            return Ok(token);
        }

        let account = self.load_account(account_id).await?;

        if account.token_valid_at(now, self.refresh_margin) {
            if let Some(expires_at) = account.token_expiry {
                self.cache(account_id, &account.access_token, expires_at);
            }
            return Ok(account.access_token);
        }

        tracing::info!(account_id, "Access token expired or unknown, refreshing");
        self.refresh_locked(&account).await
    }

    /// Refresh after Spotify rejected `rejected_token`, unless another task
    /// already replaced it.
    pub async fn force_refresh(
        &self,
        account_id: &str,
        rejected_token: &str,
    ) -> Result<String, AppError> {
        let lock = self.refresh_lock(account_id);
        let _guard = lock.lock().await;

        if let Some(token) = self.cached(account_id, Utc::now()) {
            if token != rejected_token {
                return Ok(token);
            }
        }
        self.invalidate(account_id);

        let account = self.load_account(account_id).await?;
        if account.access_token != rejected_token
            && account.token_valid_at(Utc::now(), self.refresh_margin)
        {
            return Ok(account.access_token);
        }

        tracing::info!(account_id, "Access token rejected by Spotify, refreshing");
        self.refresh_locked(&account).await
    }

    async fn load_account(&self, account_id: &str) -> Result<Account, AppError> {
        let account = self
            .db
            .get_account(account_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Account {}", account_id)))?;

        if account.reauth_required {
            return Err(AppError::ReauthRequired(format!(
                "Account {} must re-authorize",
                account_id
            )));
        }
        Ok(account)
    }

    /// Exchange the refresh token. Caller holds the account's refresh lock.
    async fn refresh_locked(&self, account: &Account) -> Result<String, AppError> {
        let account_id = account.spotify_id.as_str();

        let response = match self.client.refresh_token(&account.refresh_token).await {
            Ok(response) => response,
            Err(AppError::ReauthRequired(reason)) => {
                // Another instance may have rotated the refresh token under us.
                if let Some(current) = self.db.get_account(account_id).await? {
                    if current.refresh_token != account.refresh_token
                        && current.token_valid_at(Utc::now(), self.refresh_margin)
                    {
                        tracing::info!(
                            account_id,
                            "Refresh token race detected - using the stored winner"
                        );
                        if let Some(expires_at) = current.token_expiry {
                            self.cache(account_id, &current.access_token, expires_at);
                        }
                        return Ok(current.access_token);
                    }
                }

                tracing::warn!(account_id, reason = %reason, "Refresh token rejected, account needs re-authorization");
                self.invalidate(account_id);
                self.db.set_reauth_required(account_id, true).await?;
                return Err(AppError::ReauthRequired(reason));
            }
            Err(e) => return Err(e),
        };

        let expires_at = response.expires_at(Utc::now())?;
        self.check_lifetime(account_id, &response);
        let tokens = TokenSet {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_at,
        };
        self.db.update_tokens(account_id, &tokens).await?;
        self.cache(account_id, &tokens.access_token, expires_at);

        tracing::info!(account_id, %expires_at, "Token refreshed and cached");
        Ok(tokens.access_token)
    }

    /// A token that lives no longer than the refresh margin is refreshed on
    /// every use.
    fn check_lifetime(&self, account_id: &str, response: &TokenResponse) {
        if response.expires_in <= self.refresh_margin.num_seconds() {
            tracing::warn!(
                account_id,
                expires_in = response.expires_in,
                margin_secs = self.refresh_margin.num_seconds(),
                "Token lifetime is within the refresh margin, it will be refreshed on every use"
            );
        }
    }

    /// Run `call` with a valid token. If Spotify answers 401, refresh exactly
    /// once and retry; a second 401 is returned to the caller.
    pub async fn with_access_token<F, Fut, T>(
        &self,
        account_id: &str,
        call: F,
    ) -> Result<T, AppError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let token = self.get_valid_access_token(account_id).await?;
        match call(token.clone()).await {
            Err(AppError::SpotifyUnauthorized) => {
                let fresh = self.force_refresh(account_id, &token).await?;
                call(fresh).await
            }
            other => other,
        }
    }

    // ─── OAuth Callback Handling ─────────────────────────────────────────────

    /// Handle OAuth callback: exchange code, fetch profile, store the account.
    ///
    /// `requested_url` becomes the account's handle when it is well-formed and
    /// not taken by another account; otherwise the Spotify ID is used.
    pub async fn handle_oauth_callback(
        &self,
        code: &str,
        redirect_uri: &str,
        requested_url: Option<&str>,
    ) -> Result<OAuthResult, AppError> {
        let token_response = self.client.exchange_code(code, redirect_uri).await?;
        let profile = self.client.get_profile(&token_response.access_token).await?;

        let now = Utc::now();
        let existing = self.db.get_account(&profile.id).await?;

        let refresh_token = match (&token_response.refresh_token, &existing) {
            (Some(token), _) => token.clone(),
            (None, Some(existing)) => existing.refresh_token.clone(),
            (None, None) => {
                return Err(AppError::SpotifyApi(
                    "Token exchange returned no refresh token".to_string(),
                ))
            }
        };

        let custom_url = self
            .choose_custom_url(&profile.id, requested_url, existing.as_ref())
            .await?;

        let expires_at = token_response.expires_at(now)?;
        self.check_lifetime(&profile.id, &token_response);
        let account = Account {
            spotify_id: profile.id.clone(),
            custom_url: custom_url.clone(),
            display_name: profile
                .display_name
                .clone()
                .unwrap_or_else(|| profile.id.clone()),
            avatar_url: profile.images.first().map(|i| i.url.clone()),
            access_token: token_response.access_token.clone(),
            refresh_token,
            token_expiry: Some(expires_at),
            last_synced: existing
                .as_ref()
                .map(|a| a.last_synced)
                .unwrap_or_else(SyncStamps::default),
            reauth_required: false,
            created_at: existing.as_ref().map(|a| a.created_at).unwrap_or(now),
            updated_at: now,
        };

        self.db.upsert_account(&account).await?;
        self.cache(&account.spotify_id, &account.access_token, expires_at);

        tracing::info!(
            account_id = %account.spotify_id,
            custom_url = %account.custom_url,
            new_account = existing.is_none(),
            "OAuth callback handled, account stored"
        );

        Ok(OAuthResult {
            account_id: account.spotify_id,
            custom_url,
            display_name: account.display_name,
        })
    }

    async fn choose_custom_url(
        &self,
        spotify_id: &str,
        requested: Option<&str>,
        existing: Option<&Account>,
    ) -> Result<String, AppError> {
        if let Some(requested) = requested.filter(|url| is_valid_custom_url(url)) {
            let requested = requested.to_lowercase();
            match self.db.find_account_by_custom_url(&requested).await? {
                Some(owner) if owner.spotify_id != spotify_id => {
                    tracing::info!(
                        spotify_id,
                        requested = %requested,
                        "Requested custom URL already taken"
                    );
                }
                _ => return Ok(requested),
            }
        }

        Ok(existing
            .map(|a| a.custom_url.clone())
            .unwrap_or_else(|| spotify_id.to_lowercase()))
    }

    // ─── API Wrappers ────────────────────────────────────────────────────────

    /// Fetch the raw items of a synced resource (up to `max_pages` pages).
    pub async fn fetch_resource(
        &self,
        account_id: &str,
        kind: ResourceKind,
        max_pages: u32,
    ) -> Result<Vec<Value>, AppError> {
        let url = self.client.resource_url(kind);
        self.with_access_token(account_id, |token| {
            let url = url.clone();
            async move { self.client.fetch_pages(&url, &token, max_pages).await }
        })
        .await
    }

    pub async fn currently_playing(
        &self,
        account_id: &str,
    ) -> Result<Option<CurrentlyPlaying>, AppError> {
        self.with_access_token(account_id, |token| async move {
            self.client.currently_playing(&token).await
        })
        .await
    }

    pub async fn playlist_tracks(
        &self,
        account_id: &str,
        playlist_id: &str,
    ) -> Result<Vec<Value>, AppError> {
        self.with_access_token(account_id, |token| async move {
            self.client.playlist_tracks(&token, playlist_id).await
        })
        .await
    }
}

/// Result of handling OAuth callback.
#[derive(Debug, Clone)]
pub struct OAuthResult {
    pub account_id: String,
    pub custom_url: String,
    pub display_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorize_url_encodes_parameters() {
        let mut config = Config::test_default();
        config.spotify_accounts_url = "https://accounts.example".to_string();
        let client = SpotifyClient::new(&config);

        let url = client.authorize_url("http://localhost:5173/callback", Some("a b"));
        assert!(url.starts_with("https://accounts.example/authorize?client_id=test_client_id"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A5173%2Fcallback"));
        assert!(url.contains("scope=user-read-recently-played%20user-top-read"));
        assert!(url.ends_with("&state=a%20b"));
    }

    #[test]
    fn test_token_expiry_rejects_out_of_range_lifetimes() {
        let now = Utc::now();
        let response = |expires_in| TokenResponse {
            access_token: "a".to_string(),
            refresh_token: None,
            expires_in,
        };

        assert_eq!(
            response(3600).expires_at(now).unwrap(),
            now + Duration::hours(1)
        );
        for bad in [0, -5, i64::MAX, i64::MAX / 1000] {
            assert!(matches!(
                response(bad).expires_at(now),
                Err(AppError::SpotifyApi(_))
            ));
        }
    }

    #[test]
    fn test_resource_urls() {
        let mut config = Config::test_default();
        config.spotify_api_url = "https://api.example/v1".to_string();
        let client = SpotifyClient::new(&config);

        assert_eq!(
            client.resource_url(ResourceKind::RecentTracks),
            "https://api.example/v1/me/player/recently-played?limit=50"
        );
        assert_eq!(
            client.resource_url(ResourceKind::TopArtists),
            "https://api.example/v1/me/top/artists?limit=50&time_range=short_term"
        );
    }
}

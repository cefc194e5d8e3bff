// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use async_trait::async_trait;
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::post,
    Form, Json, Router,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use spotify_sync::config::Config;
use spotify_sync::db::{FirestoreStore, MemoryStore, Store, TokenSet};
use spotify_sync::error::AppError;
use spotify_sync::models::{Account, ResourceKind, SyncStamps, SyncedItem};
use spotify_sync::routes::create_router;
use spotify_sync::AppState;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test database connection.
#[allow(dead_code)]
pub async fn test_db() -> FirestoreStore {
    FirestoreStore::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

/// Create a test app on an empty in-memory store. Spotify is unreachable.
/// Returns the router and the shared state.
#[allow(dead_code)]
pub fn create_test_app() -> (axum::Router, Arc<AppState>, MemoryStore) {
    app_with_config(Config::test_default())
}

/// Create a test app whose Spotify calls go to `fake`.
#[allow(dead_code)]
pub fn create_test_app_with(fake: &FakeSpotify) -> (axum::Router, Arc<AppState>, MemoryStore) {
    app_with_config(fake.config())
}

#[allow(dead_code)]
pub fn app_with_config(config: Config) -> (axum::Router, Arc<AppState>, MemoryStore) {
    let store = MemoryStore::new();
    let state = Arc::new(AppState::new(config, Arc::new(store.clone())));
    (create_router(state.clone()), state, store)
}

/// Read a response body as JSON.
#[allow(dead_code)]
pub async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// ─── Fixtures ────────────────────────────────────────────────

/// Stored account whose access token is `access-{id}` and refresh token
/// `refresh-{id}`.
#[allow(dead_code)]
pub fn account(id: &str, token_expiry: Option<DateTime<Utc>>) -> Account {
    let now = Utc::now();
    Account {
        spotify_id: id.to_string(),
        custom_url: id.to_lowercase(),
        display_name: format!("{} Display", id),
        avatar_url: None,
        access_token: format!("access-{}", id),
        refresh_token: format!("refresh-{}", id),
        token_expiry,
        last_synced: SyncStamps::default(),
        reauth_required: false,
        created_at: now,
        updated_at: now,
    }
}

#[allow(dead_code)]
pub fn track_json(id: &str) -> Value {
    json!({
        "id": id,
        "name": format!("Song {}", id),
        "artists": [{"name": format!("Artist {}", id)}],
        "album": {"name": "Album", "images": [{"url": format!("https://img/{}", id)}]},
        "popularity": 50,
        "duration_ms": 180000
    })
}

/// One recently-played entry at 08:`minute` on a fixed day.
#[allow(dead_code)]
pub fn play_json(id: &str, minute: u32) -> Value {
    json!({
        "track": track_json(id),
        "played_at": format!("2024-05-01T08:{:02}:00.000Z", minute)
    })
}

#[allow(dead_code)]
pub fn artist_json(id: &str) -> Value {
    json!({"id": id, "name": format!("Band {}", id), "images": [], "popularity": 60})
}

#[allow(dead_code)]
pub fn playlist_json(id: &str, name: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "images": [{"url": format!("https://img/{}", id)}],
        "external_urls": {"spotify": format!("https://open.spotify.com/playlist/{}", id)},
        "tracks": {"total": 10}
    })
}

#[allow(dead_code)]
pub fn page(items: Vec<Value>) -> Value {
    json!({"items": items, "next": null})
}

// ─── Fake Spotify ────────────────────────────────────────────

/// Fake accounts service and Web API on an ephemeral port.
///
/// Resource responses are looked up by request path; unknown paths return an
/// empty page.
#[derive(Default)]
#[allow(dead_code)]
pub struct FakeSpotifyState {
    pub token_calls: AtomicUsize,
    pub resource_calls: AtomicUsize,
    /// Refresh tokens the accounts service rejects with `invalid_grant`.
    pub rejected_refresh_tokens: Mutex<HashSet<String>>,
    /// Access tokens the Web API answers with 401.
    pub revoked_access_tokens: Mutex<HashSet<String>>,
    /// Answer every resource call with 401.
    pub always_unauthorized: AtomicBool,
    /// Resource calls to fail with 503 before answering normally.
    pub unavailable_remaining: AtomicUsize,
    /// Milliseconds every resource call waits before answering.
    pub resource_delay_ms: AtomicU64,
    /// Path -> (status, body).
    pub responses: Mutex<HashMap<String, (StatusCode, Value)>>,
    /// Bearer tokens seen on resource calls, in order.
    pub seen_tokens: Mutex<Vec<String>>,
    /// Whether token responses include a rotated refresh token.
    pub rotate_refresh_token: AtomicBool,
}

#[allow(dead_code)]
pub struct FakeSpotify {
    pub base_url: String,
    pub state: Arc<FakeSpotifyState>,
}

#[allow(dead_code)]
impl FakeSpotify {
    pub async fn start() -> Self {
        let state = Arc::new(FakeSpotifyState::default());
        let app = Router::new()
            .route("/api/token", post(fake_token))
            .fallback(fake_resource)
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            state,
        }
    }

    /// Test config pointing at this server.
    pub fn config(&self) -> Config {
        let mut config = Config::test_default();
        config.spotify_api_url = format!("{}/v1", self.base_url);
        config.spotify_accounts_url = self.base_url.clone();
        config
    }

    /// Serve `body` with 200 for `path` (e.g. `/v1/me/top/tracks`).
    pub fn respond(&self, path: &str, body: Value) {
        self.respond_with(path, StatusCode::OK, body);
    }

    pub fn respond_with(&self, path: &str, status: StatusCode, body: Value) {
        self.state
            .responses
            .lock()
            .unwrap()
            .insert(path.to_string(), (status, body));
    }

    pub fn reject_refresh_token(&self, refresh_token: &str) {
        self.state
            .rejected_refresh_tokens
            .lock()
            .unwrap()
            .insert(refresh_token.to_string());
    }

    pub fn revoke_access_token(&self, access_token: &str) {
        self.state
            .revoked_access_tokens
            .lock()
            .unwrap()
            .insert(access_token.to_string());
    }

    pub fn token_calls(&self) -> usize {
        self.state.token_calls.load(Ordering::SeqCst)
    }

    pub fn resource_calls(&self) -> usize {
        self.state.resource_calls.load(Ordering::SeqCst)
    }

    pub fn seen_tokens(&self) -> Vec<String> {
        self.state.seen_tokens.lock().unwrap().clone()
    }
}

#[allow(dead_code)]
async fn fake_token(
    State(state): State<Arc<FakeSpotifyState>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let n = state.token_calls.fetch_add(1, Ordering::SeqCst) + 1;

    match form.get("grant_type").map(String::as_str) {
        Some("refresh_token") => {
            let refresh_token = form.get("refresh_token").cloned().unwrap_or_default();
            if state
                .rejected_refresh_tokens
                .lock()
                .unwrap()
                .contains(&refresh_token)
            {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": "invalid_grant"})),
                )
                    .into_response();
            }
            let mut body = json!({
                "access_token": format!("fresh-{}", n),
                "token_type": "Bearer",
                "expires_in": 3600
            });
            if state.rotate_refresh_token.load(Ordering::SeqCst) {
                body["refresh_token"] = json!(format!("rotated-{}", n));
            }
            Json(body).into_response()
        }
        Some("authorization_code") => {
            if form.get("code").map(String::as_str) == Some("bad-code") {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": "invalid_grant"})),
                )
                    .into_response();
            }
            Json(json!({
                "access_token": format!("code-access-{}", n),
                "refresh_token": "code-refresh",
                "token_type": "Bearer",
                "expires_in": 3600
            }))
            .into_response()
        }
        _ => StatusCode::BAD_REQUEST.into_response(),
    }
}

#[allow(dead_code)]
async fn fake_resource(
    State(state): State<Arc<FakeSpotifyState>>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    state.resource_calls.fetch_add(1, Ordering::SeqCst);
    let delay = state.resource_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
    }

    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default()
        .to_string();
    state.seen_tokens.lock().unwrap().push(token.clone());

    if state.always_unauthorized.load(Ordering::SeqCst)
        || state.revoked_access_tokens.lock().unwrap().contains(&token)
    {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": {"status": 401, "message": "The access token expired"}})),
        )
            .into_response();
    }

    if state
        .unavailable_remaining
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
    {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let configured = state.responses.lock().unwrap().get(uri.path()).cloned();
    match configured {
        Some((status, _)) if status == StatusCode::NO_CONTENT => status.into_response(),
        Some((status, body)) => (status, Json(body)).into_response(),
        None => Json(page(Vec::new())).into_response(),
    }
}

// ─── Failing store ───────────────────────────────────────────

/// Wraps a [`MemoryStore`] and fails item writes while `fail_writes` is set.
#[derive(Clone)]
#[allow(dead_code)]
pub struct FailingStore {
    pub inner: MemoryStore,
    pub fail_writes: Arc<AtomicBool>,
}

#[allow(dead_code)]
impl FailingStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            fail_writes: Arc::new(AtomicBool::new(true)),
        }
    }

    fn check(&self) -> Result<(), AppError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(AppError::Database("simulated write failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Store for FailingStore {
    async fn get_account(&self, spotify_id: &str) -> Result<Option<Account>, AppError> {
        self.inner.get_account(spotify_id).await
    }

    async fn find_account_by_custom_url(
        &self,
        custom_url: &str,
    ) -> Result<Option<Account>, AppError> {
        self.inner.find_account_by_custom_url(custom_url).await
    }

    async fn list_accounts(&self) -> Result<Vec<Account>, AppError> {
        self.inner.list_accounts().await
    }

    async fn upsert_account(&self, account: &Account) -> Result<(), AppError> {
        self.inner.upsert_account(account).await
    }

    async fn update_tokens(&self, spotify_id: &str, tokens: &TokenSet) -> Result<(), AppError> {
        self.inner.update_tokens(spotify_id, tokens).await
    }

    async fn set_reauth_required(
        &self,
        spotify_id: &str,
        required: bool,
    ) -> Result<(), AppError> {
        self.inner.set_reauth_required(spotify_id, required).await
    }

    async fn mark_synced(
        &self,
        spotify_id: &str,
        kind: ResourceKind,
        at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.inner.mark_synced(spotify_id, kind, at).await
    }

    async fn insert_new_items(&self, items: &[SyncedItem]) -> Result<usize, AppError> {
        self.check()?;
        self.inner.insert_new_items(items).await
    }

    async fn replace_items(
        &self,
        account_id: &str,
        kind: ResourceKind,
        items: &[SyncedItem],
    ) -> Result<(), AppError> {
        self.check()?;
        self.inner.replace_items(account_id, kind, items).await
    }

    async fn list_items(
        &self,
        account_id: &str,
        kind: ResourceKind,
    ) -> Result<Vec<SyncedItem>, AppError> {
        self.inner.list_items(account_id, kind).await
    }

    async fn find_playlist_by_code(&self, code: &str) -> Result<Option<SyncedItem>, AppError> {
        self.inner.find_playlist_by_code(code).await
    }
}

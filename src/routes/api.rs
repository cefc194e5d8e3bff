// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Public read API over the synchronized data.
//!
//! `{handle}` is either an account's custom URL or its Spotify ID.

use crate::error::{AppError, Result};
use crate::models::account::is_valid_custom_url;
use crate::models::{Account, AccountProfile, ResourceKind, SyncedItem};
use crate::services::payload::{parse_playlist_tracks, PlaylistTrack};
use crate::services::short_code;
use crate::time_utils::format_utc_rfc3339;
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Rows returned by the list endpoints.
const LIST_LIMIT: usize = 50;
const SEARCH_LIMIT: usize = 10;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/check-url/{custom_url}", get(check_url))
        .route("/users/search", get(search_users))
        .route("/users/{handle}", get(get_user))
        .route("/users/{handle}/recent-tracks", get(get_recent_tracks))
        .route("/users/{handle}/top-tracks", get(get_top_tracks))
        .route("/users/{handle}/top-artists", get(get_top_artists))
        .route("/users/{handle}/playlists", get(get_playlists))
        .route("/users/{handle}/currently-playing", get(get_currently_playing))
        .route("/playlists/{short_code}", get(get_playlist))
}

async fn resolve_handle(state: &AppState, handle: &str) -> Result<Account> {
    state
        .db
        .find_account_by_handle(handle)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {}", handle)))
}

// ─── Accounts ────────────────────────────────────────────────

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct UrlAvailability {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

async fn check_url(
    State(state): State<Arc<AppState>>,
    Path(custom_url): Path<String>,
) -> Result<Json<UrlAvailability>> {
    if !is_valid_custom_url(&custom_url) {
        return Ok(Json(UrlAvailability {
            available: false,
            reason: Some("Invalid URL format".to_string()),
        }));
    }

    let taken = state
        .db
        .find_account_by_custom_url(&custom_url.to_lowercase())
        .await?
        .is_some();

    Ok(Json(UrlAvailability {
        available: !taken,
        reason: taken.then(|| "Already taken".to_string()),
    }))
}

#[derive(Deserialize)]
struct SearchQuery {
    #[serde(default)]
    query: Option<String>,
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct UserSearchResult {
    pub id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

async fn search_users(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchQuery>,
) -> Result<Json<Vec<UserSearchResult>>> {
    let query = params.query.unwrap_or_default();
    let query = query.trim();
    if query.is_empty() {
        return Ok(Json(Vec::new()));
    }

    let results = state
        .db
        .search_accounts(query, SEARCH_LIMIT)
        .await?
        .into_iter()
        .map(|a| UserSearchResult {
            id: a.spotify_id,
            display_name: a.display_name,
            avatar_url: a.avatar_url,
        })
        .collect();

    Ok(Json(results))
}

async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(handle): Path<String>,
) -> Result<Json<AccountProfile>> {
    let account = resolve_handle(&state, &handle).await?;
    Ok(Json(account.profile()))
}

// ─── Listening Data ──────────────────────────────────────────

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct RecentTrackResponse {
    pub track_name: String,
    pub artist_name: Option<String>,
    pub played_at: Option<String>,
    pub album_art: Option<String>,
}

/// Newest plays first.
async fn get_recent_tracks(
    State(state): State<Arc<AppState>>,
    Path(handle): Path<String>,
) -> Result<Json<Vec<RecentTrackResponse>>> {
    let account = resolve_handle(&state, &handle).await?;
    let mut items = state
        .db
        .list_items(&account.spotify_id, ResourceKind::RecentTracks)
        .await?;
    items.sort_by(|a, b| b.played_at.cmp(&a.played_at));
    items.truncate(LIST_LIMIT);

    Ok(Json(
        items
            .into_iter()
            .map(|item| RecentTrackResponse {
                played_at: item.played_at.map(format_utc_rfc3339),
                track_name: item.name,
                artist_name: item.artist_name,
                album_art: item.image_url,
            })
            .collect(),
    ))
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct TopTrackResponse {
    pub rank: Option<u32>,
    pub track_name: String,
    pub artist_name: Option<String>,
    pub album_name: Option<String>,
    pub album_art: Option<String>,
    pub popularity: Option<u32>,
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct TopArtistResponse {
    pub rank: Option<u32>,
    pub artist_name: String,
    pub artist_image: Option<String>,
    pub popularity: Option<u32>,
}

/// Stored items of `kind` in upstream rank order.
async fn ranked_items(
    state: &AppState,
    handle: &str,
    kind: ResourceKind,
) -> Result<Vec<SyncedItem>> {
    let account = resolve_handle(state, handle).await?;
    let mut items = state.db.list_items(&account.spotify_id, kind).await?;
    items.sort_by_key(|item| item.rank.unwrap_or(u32::MAX));
    items.truncate(LIST_LIMIT);
    Ok(items)
}

async fn get_top_tracks(
    State(state): State<Arc<AppState>>,
    Path(handle): Path<String>,
) -> Result<Json<Vec<TopTrackResponse>>> {
    let items = ranked_items(&state, &handle, ResourceKind::TopTracks).await?;
    Ok(Json(
        items
            .into_iter()
            .map(|item| TopTrackResponse {
                rank: item.rank,
                track_name: item.name,
                artist_name: item.artist_name,
                album_name: item.parent_name,
                album_art: item.image_url,
                popularity: item.popularity,
            })
            .collect(),
    ))
}

async fn get_top_artists(
    State(state): State<Arc<AppState>>,
    Path(handle): Path<String>,
) -> Result<Json<Vec<TopArtistResponse>>> {
    let items = ranked_items(&state, &handle, ResourceKind::TopArtists).await?;
    Ok(Json(
        items
            .into_iter()
            .map(|item| TopArtistResponse {
                rank: item.rank,
                artist_name: item.name,
                artist_image: item.image_url,
                popularity: item.popularity,
            })
            .collect(),
    ))
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct CurrentlyPlayingResponse {
    pub is_playing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album_art: Option<String>,
}

/// Live lookup; nothing is stored.
async fn get_currently_playing(
    State(state): State<Arc<AppState>>,
    Path(handle): Path<String>,
) -> Result<Json<CurrentlyPlayingResponse>> {
    let account = resolve_handle(&state, &handle).await?;
    let playing = state.spotify.currently_playing(&account.spotify_id).await?;

    let response = match playing {
        Some(current) if current.is_playing => match current.item {
            Some(track) => CurrentlyPlayingResponse {
                is_playing: true,
                artist_name: track.first_artist(),
                album_art: track.album_art(),
                track_name: Some(track.name),
            },
            // Podcasts and ads come back without a track item.
            None => CurrentlyPlayingResponse {
                is_playing: true,
                track_name: None,
                artist_name: None,
                album_art: None,
            },
        },
        _ => CurrentlyPlayingResponse {
            is_playing: false,
            track_name: None,
            artist_name: None,
            album_art: None,
        },
    };

    Ok(Json(response))
}

// ─── Playlists ───────────────────────────────────────────────

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct PlaylistSummary {
    pub name: String,
    pub cover_image: Option<String>,
    /// Short code for `/playlists/{short_code}`
    pub url: Option<String>,
    pub total_tracks: Option<u32>,
}

/// Playlists sorted by name.
async fn get_playlists(
    State(state): State<Arc<AppState>>,
    Path(handle): Path<String>,
) -> Result<Json<Vec<PlaylistSummary>>> {
    let account = resolve_handle(&state, &handle).await?;
    let mut items = state
        .db
        .list_items(&account.spotify_id, ResourceKind::Playlists)
        .await?;
    items.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(Json(
        items
            .into_iter()
            .map(|item| PlaylistSummary {
                name: item.name,
                cover_image: item.image_url,
                url: item.short_code,
                total_tracks: item.total_tracks,
            })
            .collect(),
    ))
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct PlaylistOwner {
    pub display_name: String,
    pub profile_url: String,
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct PlaylistDetail {
    pub playlist_name: String,
    pub cover_image: Option<String>,
    pub total_tracks: Option<u32>,
    pub spotify_url: Option<String>,
    pub owner: PlaylistOwner,
    pub tracks: Vec<PlaylistTrack>,
}

/// Stored playlist plus a live track listing from the owner's account.
async fn get_playlist(
    State(state): State<Arc<AppState>>,
    Path(short_code): Path<String>,
) -> Result<Json<PlaylistDetail>> {
    let not_found = || AppError::NotFound(format!("Playlist {}", short_code));
    if !short_code::is_well_formed(&short_code) {
        return Err(not_found());
    }

    let playlist = state
        .db
        .find_playlist_by_code(&short_code)
        .await?
        .ok_or_else(not_found)?;
    let owner = state
        .db
        .get_account(&playlist.account_id)
        .await?
        .ok_or_else(not_found)?;

    let raw = state
        .spotify
        .playlist_tracks(&owner.spotify_id, &playlist.item_id)
        .await?;

    Ok(Json(PlaylistDetail {
        playlist_name: playlist.name,
        cover_image: playlist.image_url,
        total_tracks: playlist.total_tracks,
        spotify_url: playlist.external_url,
        owner: PlaylistOwner {
            display_name: owner.display_name,
            profile_url: owner.custom_url,
        },
        tracks: parse_playlist_tracks(raw),
    }))
}

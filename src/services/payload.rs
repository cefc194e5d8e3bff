// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Spotify response payloads and their conversion into [`SyncedItem`]s.
//!
//! Pages are decoded leniently: the envelope must be well-formed, but each
//! item is decoded on its own so one bad record only costs that record.

use crate::models::{ResourceKind, SyncedItem};
use crate::time_utils::parse_rfc3339_utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Paging envelope shared by every list endpoint.
#[derive(Debug, Deserialize)]
pub struct Page {
    pub items: Vec<Value>,
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Image {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArtistRef {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Album {
    pub name: String,
    #[serde(default)]
    pub images: Vec<Image>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Track {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub artists: Vec<ArtistRef>,
    pub album: Album,
    #[serde(default)]
    pub popularity: Option<u32>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

impl Track {
    pub fn first_artist(&self) -> Option<String> {
        self.artists.first().map(|a| a.name.clone())
    }

    pub fn album_art(&self) -> Option<String> {
        self.album.images.first().map(|i| i.url.clone())
    }
}

#[derive(Debug, Deserialize)]
struct PlayHistory {
    track: Track,
    played_at: String,
}

#[derive(Debug, Deserialize)]
struct Artist {
    id: String,
    name: String,
    #[serde(default)]
    images: Vec<Image>,
    #[serde(default)]
    popularity: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ExternalUrls {
    #[serde(default)]
    spotify: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TrackCount {
    total: u32,
}

#[derive(Debug, Deserialize)]
struct Playlist {
    id: String,
    name: String,
    // Spotify sends `null` rather than `[]` for playlists without a cover.
    #[serde(default)]
    images: Option<Vec<Image>>,
    external_urls: ExternalUrls,
    tracks: TrackCount,
}

/// `GET /me` profile.
#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub images: Vec<Image>,
}

/// `GET /me/player/currently-playing` body.
#[derive(Debug, Deserialize)]
pub struct CurrentlyPlaying {
    #[serde(default)]
    pub is_playing: bool,
    #[serde(default)]
    pub item: Option<Track>,
}

/// Simplified track returned by the playlist detail endpoint.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[cfg_attr(feature = "binding-generation", derive(ts_rs::TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct PlaylistTrack {
    pub track_name: String,
    pub artist_name: Option<String>,
    pub album_name: String,
    pub album_art: Option<String>,
    #[cfg_attr(feature = "binding-generation", ts(type = "number | null"))]
    pub duration: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct PlaylistEntry {
    #[serde(default)]
    track: Option<Track>,
}

/// Convert raw page items into synced items for `account_id`.
///
/// Ranks are 1-based positions in the upstream list, so a skipped record
/// leaves a gap rather than shifting everything after it.
pub fn parse_items(kind: ResourceKind, account_id: &str, raw: Vec<Value>) -> Vec<SyncedItem> {
    let total = raw.len();
    let items: Vec<SyncedItem> = raw
        .into_iter()
        .enumerate()
        .filter_map(|(index, value)| {
            let rank = index as u32 + 1;
            match parse_item(kind, account_id, rank, value) {
                Ok(item) => Some(item),
                Err(reason) => {
                    tracing::warn!(
                        account_id,
                        kind = %kind,
                        position = rank,
                        reason = %reason,
                        "Skipping malformed item"
                    );
                    None
                }
            }
        })
        .collect();

    if items.len() < total {
        tracing::info!(
            account_id,
            kind = %kind,
            total,
            kept = items.len(),
            "Some upstream items were skipped"
        );
    }

    items
}

fn parse_item(
    kind: ResourceKind,
    account_id: &str,
    rank: u32,
    value: Value,
) -> Result<SyncedItem, String> {
    if value.is_null() {
        return Err("null item".to_string());
    }

    let base = SyncedItem {
        account_id: account_id.to_string(),
        kind,
        item_id: String::new(),
        name: String::new(),
        artist_name: None,
        parent_name: None,
        image_url: None,
        rank: None,
        popularity: None,
        played_at: None,
        external_url: None,
        total_tracks: None,
        short_code: None,
    };

    match kind {
        ResourceKind::RecentTracks => {
            let play: PlayHistory = serde_json::from_value(value).map_err(|e| e.to_string())?;
            let played_at = parse_rfc3339_utc(&play.played_at)
                .ok_or_else(|| format!("invalid played_at {:?}", play.played_at))?;
            Ok(SyncedItem {
                artist_name: play.track.first_artist(),
                image_url: play.track.album_art(),
                item_id: play.track.id,
                name: play.track.name,
                parent_name: Some(play.track.album.name),
                played_at: Some(played_at),
                ..base
            })
        }
        ResourceKind::TopTracks => {
            let track: Track = serde_json::from_value(value).map_err(|e| e.to_string())?;
            Ok(SyncedItem {
                artist_name: track.first_artist(),
                image_url: track.album_art(),
                popularity: track.popularity,
                item_id: track.id,
                name: track.name,
                parent_name: Some(track.album.name),
                rank: Some(rank),
                ..base
            })
        }
        ResourceKind::TopArtists => {
            let artist: Artist = serde_json::from_value(value).map_err(|e| e.to_string())?;
            Ok(SyncedItem {
                image_url: artist.images.first().map(|i| i.url.clone()),
                item_id: artist.id,
                name: artist.name,
                popularity: artist.popularity,
                rank: Some(rank),
                ..base
            })
        }
        ResourceKind::Playlists => {
            let playlist: Playlist = serde_json::from_value(value).map_err(|e| e.to_string())?;
            Ok(SyncedItem {
                image_url: playlist
                    .images
                    .and_then(|images| images.into_iter().next())
                    .map(|i| i.url),
                item_id: playlist.id,
                name: playlist.name,
                external_url: playlist.external_urls.spotify,
                total_tracks: Some(playlist.tracks.total),
                rank: Some(rank),
                ..base
            })
        }
    }
}

/// Convert playlist entries, dropping removed or local-only tracks.
pub fn parse_playlist_tracks(raw: Vec<Value>) -> Vec<PlaylistTrack> {
    raw.into_iter()
        .filter_map(|value| serde_json::from_value::<PlaylistEntry>(value).ok())
        .filter_map(|entry| entry.track)
        .map(|track| PlaylistTrack {
            artist_name: track.first_artist(),
            album_art: track.album_art(),
            track_name: track.name,
            album_name: track.album.name,
            duration: track.duration_ms,
        })
        .collect()
}

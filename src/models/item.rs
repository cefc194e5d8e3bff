// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Synced item model: one fetched-and-persisted track, artist or playlist.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The external collections we mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    RecentTracks,
    TopTracks,
    TopArtists,
    Playlists,
}

/// How a freshly fetched collection is merged into storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcilePolicy {
    /// Delete all rows for account+kind, then insert the new set.
    Replace,
    /// Insert rows whose natural key is new, leave existing rows alone.
    Upsert,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::RecentTracks,
        ResourceKind::TopTracks,
        ResourceKind::TopArtists,
        ResourceKind::Playlists,
    ];

    /// Listening history is append-only and fetch windows overlap, so it is
    /// upserted. Rankings and playlists are snapshots and get replaced.
    pub fn policy(self) -> ReconcilePolicy {
        match self {
            ResourceKind::RecentTracks => ReconcilePolicy::Upsert,
            ResourceKind::TopTracks | ResourceKind::TopArtists | ResourceKind::Playlists => {
                ReconcilePolicy::Replace
            }
        }
    }

    /// Storage collection name.
    pub fn collection(self) -> &'static str {
        match self {
            ResourceKind::RecentTracks => "recent_tracks",
            ResourceKind::TopTracks => "top_tracks",
            ResourceKind::TopArtists => "top_artists",
            ResourceKind::Playlists => "playlists",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.collection())
    }
}

/// One persisted record attributable to an account.
///
/// All kinds share this shape; fields that only make sense for some kinds
/// are optional.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncedItem {
    /// Owning account's Spotify ID
    pub account_id: String,
    pub kind: ResourceKind,
    /// Spotify ID of the track, artist or playlist
    pub item_id: String,
    pub name: String,
    /// First credited artist (tracks only)
    #[serde(default)]
    pub artist_name: Option<String>,
    /// Album name (tracks only)
    #[serde(default)]
    pub parent_name: Option<String>,
    /// Album art, artist image or playlist cover
    #[serde(default)]
    pub image_url: Option<String>,
    /// 1-based position in the upstream list (top items and playlists)
    #[serde(default)]
    pub rank: Option<u32>,
    #[serde(default)]
    pub popularity: Option<u32>,
    /// When the track was played (recent tracks only)
    #[serde(default)]
    pub played_at: Option<DateTime<Utc>>,
    /// Link to the item on open.spotify.com (playlists only)
    #[serde(default)]
    pub external_url: Option<String>,
    #[serde(default)]
    pub total_tracks: Option<u32>,
    /// Our short link code (playlists only)
    #[serde(default)]
    pub short_code: Option<String>,
}

impl SyncedItem {
    /// Natural key used for deduplication and as the document ID.
    ///
    /// History rows are keyed by `(account, track, played_at)`; snapshot kinds
    /// by `(account, item)` since the kind already partitions the collection.
    pub fn natural_key(&self) -> String {
        let account = urlencoding::encode(&self.account_id);
        let item = urlencoding::encode(&self.item_id);
        match (self.kind, self.played_at) {
            (ResourceKind::RecentTracks, Some(played_at)) => format!(
                "{}_{}_{}",
                account,
                item,
                played_at.timestamp_millis()
            ),
            _ => format!("{}_{}", account, item),
        }
    }
}

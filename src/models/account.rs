// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Account model: one Spotify user's OAuth session and profile.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ResourceKind;

/// Account stored in the `accounts` collection, keyed by `spotify_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Account {
    /// Spotify user ID (also used as document ID)
    pub spotify_id: String,
    /// Lowercase vanity handle, unique across accounts
    pub custom_url: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub access_token: String,
    pub refresh_token: String,
    /// Remote-side expiry of `access_token`; `None` forces a refresh.
    #[serde(default)]
    pub token_expiry: Option<DateTime<Utc>>,
    /// Last successful reconciliation per resource kind
    #[serde(default)]
    pub last_synced: SyncStamps,
    /// Set when Spotify rejected the refresh token.
    #[serde(default)]
    pub reauth_required: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Whether the access token is still usable `margin` from now.
    pub fn token_valid_at(&self, now: DateTime<Utc>, margin: chrono::Duration) -> bool {
        self.token_expiry
            .is_some_and(|expiry| now + margin < expiry)
    }

    /// Account-level last sync: the oldest per-resource stamp, or `None` if
    /// any of `kinds` has never been synced.
    pub fn last_synced_at(&self, kinds: &[ResourceKind]) -> Option<DateTime<Utc>> {
        kinds
            .iter()
            .map(|kind| self.last_synced.get(*kind))
            .collect::<Option<Vec<_>>>()?
            .into_iter()
            .min()
    }

    /// Whether any of `kinds` was last synced longer than `resync_after` ago.
    pub fn is_due(
        &self,
        kinds: &[ResourceKind],
        now: DateTime<Utc>,
        resync_after: chrono::Duration,
    ) -> bool {
        if self.reauth_required {
            return false;
        }
        match self.last_synced_at(kinds) {
            Some(at) => now - at >= resync_after,
            None => true,
        }
    }

    /// Public profile view.
    pub fn profile(&self) -> AccountProfile {
        AccountProfile {
            id: self.spotify_id.clone(),
            custom_url: self.custom_url.clone(),
            display_name: self.display_name.clone(),
            avatar_url: self.avatar_url.clone(),
        }
    }
}

/// Custom URLs are 3 to 30 characters of ASCII letters, digits, `_` or `-`.
pub fn is_valid_custom_url(url: &str) -> bool {
    (3..=30).contains(&url.len())
        && url
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Per-resource last-sync timestamps.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct SyncStamps {
    #[serde(default)]
    pub recent_tracks: Option<DateTime<Utc>>,
    #[serde(default)]
    pub top_tracks: Option<DateTime<Utc>>,
    #[serde(default)]
    pub top_artists: Option<DateTime<Utc>>,
    #[serde(default)]
    pub playlists: Option<DateTime<Utc>>,
}

impl SyncStamps {
    pub fn get(&self, kind: ResourceKind) -> Option<DateTime<Utc>> {
        *self.slot(kind)
    }

    pub fn set(&mut self, kind: ResourceKind, at: DateTime<Utc>) {
        *self.slot_mut(kind) = Some(at);
    }

    fn slot(&self, kind: ResourceKind) -> &Option<DateTime<Utc>> {
        match kind {
            ResourceKind::RecentTracks => &self.recent_tracks,
            ResourceKind::TopTracks => &self.top_tracks,
            ResourceKind::TopArtists => &self.top_artists,
            ResourceKind::Playlists => &self.playlists,
        }
    }

    fn slot_mut(&mut self, kind: ResourceKind) -> &mut Option<DateTime<Utc>> {
        match kind {
            ResourceKind::RecentTracks => &mut self.recent_tracks,
            ResourceKind::TopTracks => &mut self.top_tracks,
            ResourceKind::TopArtists => &mut self.top_artists,
            ResourceKind::Playlists => &mut self.playlists,
        }
    }
}

/// Account fields that are safe to expose over the API.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[cfg_attr(feature = "binding-generation", derive(ts_rs::TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct AccountProfile {
    pub id: String,
    pub custom_url: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

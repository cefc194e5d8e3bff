// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Spotify-Sync: mirror Spotify listening data and serve it over REST
//!
//! This crate keeps each signed-in account's OAuth credentials fresh,
//! periodically pulls recent tracks, top items and playlists from Spotify,
//! and exposes the stored copies through a small read API.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use db::Store;
use services::{SpotifyService, SyncService};
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub db: Arc<dyn Store>,
    pub spotify: SpotifyService,
    pub sync: SyncService,
}

impl AppState {
    /// Wire services around `db`.
    pub fn new(config: Config, db: Arc<dyn Store>) -> Self {
        let spotify = SpotifyService::new(&config, db.clone());
        let sync = SyncService::new(&config, db.clone(), spotify.clone());
        Self {
            config,
            db,
            spotify,
            sync,
        }
    }
}

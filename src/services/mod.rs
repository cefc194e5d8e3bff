// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod payload;
pub mod retry;
pub mod scheduler;
pub mod short_code;
pub mod spotify;
pub mod sync;

pub use scheduler::Scheduler;
pub use spotify::{OAuthResult, SpotifyClient, SpotifyService};
pub use sync::{SyncJob, SyncPhase, SyncReport, SyncService};

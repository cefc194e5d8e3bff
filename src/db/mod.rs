// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Database layer.
//!
//! [`Store`] is the persistence seam. Production uses Firestore; local
//! development and tests use the in-memory backend.

pub mod firestore;
pub mod memory;

pub use self::firestore::FirestoreStore;
pub use memory::MemoryStore;

use crate::error::AppError;
use crate::models::{Account, ResourceKind, SyncedItem};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Collection names as constants.
pub mod collections {
    pub const ACCOUNTS: &str = "accounts";
}

/// Credentials produced by a code exchange or a refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenSet {
    pub access_token: String,
    /// Spotify only sometimes rotates the refresh token.
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Persistence operations used by the sync cycle and the API.
///
/// Each call is one logical operation; implementations acquire and release
/// whatever connection or transaction they need within the call.
#[async_trait]
pub trait Store: Send + Sync {
    // ─── Accounts ────────────────────────────────────────────────

    async fn get_account(&self, spotify_id: &str) -> Result<Option<Account>, AppError>;

    /// Look up an account by its (lowercase) custom URL.
    async fn find_account_by_custom_url(
        &self,
        custom_url: &str,
    ) -> Result<Option<Account>, AppError>;

    async fn list_accounts(&self) -> Result<Vec<Account>, AppError>;

    /// Create or fully overwrite an account.
    async fn upsert_account(&self, account: &Account) -> Result<(), AppError>;

    /// Persist refreshed credentials and clear the re-authorization flag.
    async fn update_tokens(&self, spotify_id: &str, tokens: &TokenSet) -> Result<(), AppError>;

    async fn set_reauth_required(&self, spotify_id: &str, required: bool)
        -> Result<(), AppError>;

    /// Stamp a successful reconciliation of `kind`.
    async fn mark_synced(
        &self,
        spotify_id: &str,
        kind: ResourceKind,
        at: DateTime<Utc>,
    ) -> Result<(), AppError>;

    // ─── Synced items ────────────────────────────────────────────

    /// Insert items whose natural key is not yet stored. Returns how many
    /// were new.
    async fn insert_new_items(&self, items: &[SyncedItem]) -> Result<usize, AppError>;

    /// Replace every stored item of `kind` for the account with `items`.
    async fn replace_items(
        &self,
        account_id: &str,
        kind: ResourceKind,
        items: &[SyncedItem],
    ) -> Result<(), AppError>;

    /// All items of `kind` for the account, in no particular order.
    async fn list_items(
        &self,
        account_id: &str,
        kind: ResourceKind,
    ) -> Result<Vec<SyncedItem>, AppError>;

    async fn find_playlist_by_code(&self, code: &str) -> Result<Option<SyncedItem>, AppError>;

    // ─── Provided ────────────────────────────────────────────────

    /// Resolve a user-facing handle: custom URL first, then Spotify ID.
    async fn find_account_by_handle(&self, handle: &str) -> Result<Option<Account>, AppError> {
        if let Some(account) = self
            .find_account_by_custom_url(&handle.to_lowercase())
            .await?
        {
            return Ok(Some(account));
        }
        self.get_account(handle).await
    }

    /// Case-insensitive substring search over Spotify ID and display name.
    async fn search_accounts(&self, query: &str, limit: usize) -> Result<Vec<Account>, AppError> {
        let needle = query.to_lowercase();
        let mut matches: Vec<Account> = self
            .list_accounts()
            .await?
            .into_iter()
            .filter(|a| {
                a.spotify_id.to_lowercase().contains(&needle)
                    || a.display_name.to_lowercase().contains(&needle)
            })
            .collect();
        matches.sort_by(|a, b| a.spotify_id.cmp(&b.spotify_id));
        matches.truncate(limit);
        Ok(matches)
    }
}

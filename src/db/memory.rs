// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-memory [`Store`] for local development and tests.

use crate::db::{Store, TokenSet};
use crate::error::AppError;
use crate::models::{Account, ResourceKind, SyncedItem};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Inner {
    accounts: BTreeMap<String, Account>,
    /// Items per kind, keyed by natural key.
    items: HashMap<ResourceKind, BTreeMap<String, SyncedItem>>,
}

/// Process-local store. Clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn modify_account<F>(&self, spotify_id: &str, modify: F) -> Result<(), AppError>
    where
        F: FnOnce(&mut Account) + Send,
    {
        let mut inner = self.inner.write().await;
        let account = inner
            .accounts
            .get_mut(spotify_id)
            .ok_or_else(|| AppError::NotFound(format!("Account {}", spotify_id)))?;
        modify(account);
        account.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_account(&self, spotify_id: &str) -> Result<Option<Account>, AppError> {
        Ok(self.inner.read().await.accounts.get(spotify_id).cloned())
    }

    async fn find_account_by_custom_url(
        &self,
        custom_url: &str,
    ) -> Result<Option<Account>, AppError> {
        Ok(self
            .inner
            .read()
            .await
            .accounts
            .values()
            .find(|a| a.custom_url == custom_url)
            .cloned())
    }

    async fn list_accounts(&self) -> Result<Vec<Account>, AppError> {
        Ok(self.inner.read().await.accounts.values().cloned().collect())
    }

    async fn upsert_account(&self, account: &Account) -> Result<(), AppError> {
        self.inner
            .write()
            .await
            .accounts
            .insert(account.spotify_id.clone(), account.clone());
        Ok(())
    }

    async fn update_tokens(&self, spotify_id: &str, tokens: &TokenSet) -> Result<(), AppError> {
        let tokens = tokens.clone();
        self.modify_account(spotify_id, move |account| {
            account.access_token = tokens.access_token;
            if let Some(refresh_token) = tokens.refresh_token {
                account.refresh_token = refresh_token;
            }
            account.token_expiry = Some(tokens.expires_at);
            account.reauth_required = false;
        })
        .await
    }

    async fn set_reauth_required(
        &self,
        spotify_id: &str,
        required: bool,
    ) -> Result<(), AppError> {
        self.modify_account(spotify_id, move |account| {
            account.reauth_required = required
        })
        .await
    }

    async fn mark_synced(
        &self,
        spotify_id: &str,
        kind: ResourceKind,
        at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.modify_account(spotify_id, move |account| account.last_synced.set(kind, at))
            .await
    }

    async fn insert_new_items(&self, items: &[SyncedItem]) -> Result<usize, AppError> {
        let mut inner = self.inner.write().await;
        let mut inserted = 0;
        for item in items {
            let rows = inner.items.entry(item.kind).or_default();
            let key = item.natural_key();
            if !rows.contains_key(&key) {
                rows.insert(key, item.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn replace_items(
        &self,
        account_id: &str,
        kind: ResourceKind,
        items: &[SyncedItem],
    ) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        let rows = inner.items.entry(kind).or_default();
        rows.retain(|_, item| item.account_id != account_id);
        for item in items {
            rows.insert(item.natural_key(), item.clone());
        }
        Ok(())
    }

    async fn list_items(
        &self,
        account_id: &str,
        kind: ResourceKind,
    ) -> Result<Vec<SyncedItem>, AppError> {
        Ok(self
            .inner
            .read()
            .await
            .items
            .get(&kind)
            .map(|rows| {
                rows.values()
                    .filter(|item| item.account_id == account_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn find_playlist_by_code(&self, code: &str) -> Result<Option<SyncedItem>, AppError> {
        Ok(self
            .inner
            .read()
            .await
            .items
            .get(&ResourceKind::Playlists)
            .and_then(|rows| {
                rows.values()
                    .find(|item| item.short_code.as_deref() == Some(code))
                    .cloned()
            }))
    }
}

// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore-backed [`Store`].
//!
//! Layout:
//! - `accounts/{spotify_id}`
//! - `recent_tracks`, `top_tracks`, `top_artists`, `playlists`: one document
//!   per item, keyed by the item's natural key and tagged with `account_id`

use crate::db::{collections, Store, TokenSet};
use crate::error::AppError;
use crate::models::{Account, ResourceKind, SyncedItem};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

// Firestore limits batch/transaction writes to 500 operations.
// We use a safe limit of 400 to allow headroom.
const BATCH_SIZE: usize = 400;

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreStore {
    client: firestore::FirestoreDb,
}

impl FirestoreStore {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self, AppError> {
        // If the emulator environment variable is set, use unauthenticated connection
        // to avoid local credential warnings and leakage.
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self { client })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self, AppError> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self { client })
    }

    /// Read-modify-write of selected account fields.
    ///
    /// Only the listed field paths are written, so concurrent writers touching
    /// other fields (a different resource's sync stamp, say) are not clobbered.
    async fn patch_account<F>(
        &self,
        spotify_id: &str,
        field_paths: Vec<String>,
        modify: F,
    ) -> Result<(), AppError>
    where
        F: FnOnce(&mut Account) + Send,
    {
        let mut account = self
            .get_account(spotify_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Account {}", spotify_id)))?;

        modify(&mut account);
        account.updated_at = Utc::now();

        let mut fields = field_paths;
        fields.push("updated_at".to_string());

        let _: () = self
            .client
            .fluent()
            .update()
            .fields(fields)
            .in_col(collections::ACCOUNTS)
            .document_id(spotify_id)
            .object(&account)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    /// Load every stored item of `kind` for an account.
    async fn query_items(
        &self,
        account_id: &str,
        kind: ResourceKind,
    ) -> Result<Vec<SyncedItem>, AppError> {
        self.client
            .fluent()
            .select()
            .from(kind.collection())
            .filter(|q| q.for_all([q.field("account_id").eq(account_id)]))
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}

#[async_trait]
impl Store for FirestoreStore {
    // ─── Account Operations ──────────────────────────────────────

    async fn get_account(&self, spotify_id: &str) -> Result<Option<Account>, AppError> {
        self.client
            .fluent()
            .select()
            .by_id_in(collections::ACCOUNTS)
            .obj()
            .one(spotify_id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn find_account_by_custom_url(
        &self,
        custom_url: &str,
    ) -> Result<Option<Account>, AppError> {
        let matches: Vec<Account> = self
            .client
            .fluent()
            .select()
            .from(collections::ACCOUNTS)
            .filter(|q| q.for_all([q.field("custom_url").eq(custom_url)]))
            .limit(1)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(matches.into_iter().next())
    }

    async fn list_accounts(&self) -> Result<Vec<Account>, AppError> {
        self.client
            .fluent()
            .select()
            .from(collections::ACCOUNTS)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn upsert_account(&self, account: &Account) -> Result<(), AppError> {
        let _: () = self
            .client
            .fluent()
            .update()
            .in_col(collections::ACCOUNTS)
            .document_id(&account.spotify_id)
            .object(account)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    async fn update_tokens(&self, spotify_id: &str, tokens: &TokenSet) -> Result<(), AppError> {
        let tokens = tokens.clone();
        self.patch_account(
            spotify_id,
            vec![
                "access_token".to_string(),
                "refresh_token".to_string(),
                "token_expiry".to_string(),
                "reauth_required".to_string(),
            ],
            move |account| {
                account.access_token = tokens.access_token;
                if let Some(refresh_token) = tokens.refresh_token {
                    account.refresh_token = refresh_token;
                }
                account.token_expiry = Some(tokens.expires_at);
                account.reauth_required = false;
            },
        )
        .await
    }

    async fn set_reauth_required(
        &self,
        spotify_id: &str,
        required: bool,
    ) -> Result<(), AppError> {
        self.patch_account(
            spotify_id,
            vec!["reauth_required".to_string()],
            move |account| account.reauth_required = required,
        )
        .await
    }

    async fn mark_synced(
        &self,
        spotify_id: &str,
        kind: ResourceKind,
        at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.patch_account(
            spotify_id,
            vec![format!("last_synced.{}", kind.collection())],
            move |account| account.last_synced.set(kind, at),
        )
        .await
    }

    // ─── Item Operations ─────────────────────────────────────────

    /// Uses Firestore `create` semantics: a document that already exists is
    /// reported as a conflict, which we count as "not new".
    async fn insert_new_items(&self, items: &[SyncedItem]) -> Result<usize, AppError> {
        let client = &self.client;
        let mut inserted = 0;

        for item in items {
            let result: Result<SyncedItem, _> = client
                .fluent()
                .insert()
                .into(item.kind.collection())
                .document_id(item.natural_key())
                .object(item)
                .execute()
                .await;

            match result {
                Ok(_) => inserted += 1,
                Err(firestore::errors::FirestoreError::DataConflictError(_)) => {}
                Err(e) => return Err(AppError::Database(e.to_string())),
            }
        }

        Ok(inserted)
    }

    /// Deletes stale documents and writes the new set. When the combined
    /// operation count fits in one transaction the replace is atomic;
    /// larger sets are committed in chunks.
    async fn replace_items(
        &self,
        account_id: &str,
        kind: ResourceKind,
        items: &[SyncedItem],
    ) -> Result<(), AppError> {
        let client = &self.client;
        let collection = kind.collection();

        let new_ids: std::collections::HashSet<String> =
            items.iter().map(SyncedItem::natural_key).collect();
        let stale_ids: Vec<String> = self
            .query_items(account_id, kind)
            .await?
            .iter()
            .map(SyncedItem::natural_key)
            .filter(|id| !new_ids.contains(id))
            .collect();

        enum Op<'a> {
            Delete(&'a str),
            Write(&'a SyncedItem),
        }

        let ops: Vec<Op> = stale_ids
            .iter()
            .map(|id| Op::Delete(id.as_str()))
            .chain(items.iter().map(Op::Write))
            .collect();

        for chunk in ops.chunks(BATCH_SIZE) {
            let mut transaction = client
                .begin_transaction()
                .await
                .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

            for op in chunk {
                let added = match op {
                    Op::Delete(doc_id) => client
                        .fluent()
                        .delete()
                        .from(collection)
                        .document_id(*doc_id)
                        .add_to_transaction(&mut transaction),
                    Op::Write(item) => client
                        .fluent()
                        .update()
                        .in_col(collection)
                        .document_id(item.natural_key())
                        .object(*item)
                        .add_to_transaction(&mut transaction),
                };
                added.map_err(|e| {
                    AppError::Database(format!(
                        "Failed to add {} write to transaction: {}",
                        collection, e
                    ))
                })?;
            }

            transaction
                .commit()
                .await
                .map_err(|e| AppError::Database(format!("Transaction commit failed: {}", e)))?;
        }

        tracing::debug!(
            account_id,
            kind = %kind,
            deleted = stale_ids.len(),
            written = items.len(),
            "Replaced items"
        );

        Ok(())
    }

    async fn list_items(
        &self,
        account_id: &str,
        kind: ResourceKind,
    ) -> Result<Vec<SyncedItem>, AppError> {
        self.query_items(account_id, kind).await
    }

    async fn find_playlist_by_code(&self, code: &str) -> Result<Option<SyncedItem>, AppError> {
        let matches: Vec<SyncedItem> = self
            .client
            .fluent()
            .select()
            .from(ResourceKind::Playlists.collection())
            .filter(|q| q.for_all([q.field("short_code").eq(code)]))
            .limit(1)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(matches.into_iter().next())
    }
}

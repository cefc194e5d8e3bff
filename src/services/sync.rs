// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Sync cycle: refresh credentials, fetch, reconcile, stamp.
//!
//! Each account moves through
//! `Pending -> Refreshing -> Fetching -> Reconciling -> Done`; a failure in
//! any phase ends that account's run as `Skipped` and the cycle moves on.

use crate::config::{Config, JobTiming};
use crate::db::Store;
use crate::error::AppError;
use crate::models::{Account, ReconcilePolicy, ResourceKind, SyncedItem};
use crate::services::payload::parse_items;
use crate::services::short_code;
use crate::services::SpotifyService;
use crate::time_utils::chrono_duration;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::StreamExt;
use ring::rand::SystemRandom;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Attempts at finding an unused short code before giving up.
const SHORT_CODE_ATTEMPTS: usize = 8;

/// A named group of resources synchronized together on one schedule.
#[derive(Debug, Clone)]
pub struct SyncJob {
    pub name: &'static str,
    pub resources: Vec<ResourceKind>,
    pub timing: JobTiming,
}

impl SyncJob {
    /// The three standard jobs with timings from configuration.
    pub fn defaults(config: &Config) -> Vec<SyncJob> {
        vec![
            SyncJob {
                name: "recent-tracks",
                resources: vec![ResourceKind::RecentTracks],
                timing: config.recent_tracks_job,
            },
            SyncJob {
                name: "top-items",
                resources: vec![ResourceKind::TopTracks, ResourceKind::TopArtists],
                timing: config.top_items_job,
            },
            SyncJob {
                name: "playlists",
                resources: vec![ResourceKind::Playlists],
                timing: config.playlists_job,
            },
        ]
    }
}

/// Where an account's run is (or where it stopped).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Pending,
    Refreshing,
    Fetching,
    Reconciling,
    Done,
    Skipped,
}

/// Result of one account's run within a cycle.
#[derive(Debug, Clone)]
pub struct AccountOutcome {
    pub account_id: String,
    /// `Done` or `Skipped`.
    pub phase: SyncPhase,
    /// Phase that failed, for skipped runs.
    pub failed_in: Option<SyncPhase>,
    pub error: Option<String>,
    /// Rows written (replace) or newly inserted (upsert).
    pub rows: usize,
}

/// Summary of one job run.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub job: &'static str,
    pub started_at: DateTime<Utc>,
    /// Accounts whose last sync was recent enough to leave alone.
    pub not_due: usize,
    /// Due accounts already being synchronized by another run.
    pub busy: usize,
    pub outcomes: Vec<AccountOutcome>,
}

impl SyncReport {
    pub fn synced(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.phase == SyncPhase::Done)
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.phase == SyncPhase::Skipped)
            .count()
    }
}

struct PhaseError {
    phase: SyncPhase,
    error: AppError,
}

trait InPhase<T> {
    fn in_phase(self, phase: SyncPhase) -> Result<T, PhaseError>;
}

impl<T> InPhase<T> for Result<T, AppError> {
    fn in_phase(self, phase: SyncPhase) -> Result<T, PhaseError> {
        self.map_err(|error| PhaseError { phase, error })
    }
}

/// Removes the account from the in-flight set when dropped.
struct InFlightGuard {
    in_flight: Arc<DashMap<String, ()>>,
    account_id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.account_id);
    }
}

/// Age at which a job's kinds become due: the resync interval less half a
/// period, i.e. the tick nearest the resync deadline.
fn due_threshold(timing: &JobTiming) -> chrono::Duration {
    let slack = chrono_duration(timing.interval) / 2;
    (chrono_duration(timing.resync_after) - slack).max(chrono::Duration::zero())
}

/// Runs sync jobs against the store.
#[derive(Clone)]
pub struct SyncService {
    spotify: SpotifyService,
    db: Arc<dyn Store>,
    max_pages: u32,
    concurrency: usize,
    in_flight: Arc<DashMap<String, ()>>,
    rng: SystemRandom,
}

impl SyncService {
    pub fn new(config: &Config, db: Arc<dyn Store>, spotify: SpotifyService) -> Self {
        Self {
            spotify,
            db,
            max_pages: config.sync_max_pages,
            concurrency: config.sync_concurrency.max(1),
            in_flight: Arc::new(DashMap::new()),
            rng: SystemRandom::new(),
        }
    }

    /// Claim the account for this run, or `None` if another run holds it.
    fn try_claim(&self, account_id: &str) -> Option<InFlightGuard> {
        match self.in_flight.entry(account_id.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(InFlightGuard {
                    in_flight: self.in_flight.clone(),
                    account_id: account_id.to_string(),
                })
            }
        }
    }

    /// Run one cycle of `job` over every due account.
    ///
    /// Only listing accounts can fail the whole cycle; per-account failures
    /// are recorded in the report.
    pub async fn run_job(&self, job: &SyncJob) -> Result<SyncReport, AppError> {
        let started_at = Utc::now();
        let resync_after = due_threshold(&job.timing);

        let accounts = self.db.list_accounts().await?;
        let total = accounts.len();
        let due: Vec<Account> = accounts
            .into_iter()
            .filter(|a| a.is_due(&job.resources, started_at, resync_after))
            .collect();
        let not_due = total - due.len();

        // Claim at the account's turn; queued accounts stay free for other jobs.
        let results: Vec<Option<AccountOutcome>> = futures_util::stream::iter(due)
            .map(|account| async move {
                let Some(_guard) = self.try_claim(&account.spotify_id) else {
                    tracing::debug!(
                        job = job.name,
                        account_id = %account.spotify_id,
                        "Account already syncing, leaving it for the next cycle"
                    );
                    return None;
                };
                Some(
                    self.sync_account_at(&account.spotify_id, &job.resources, started_at)
                        .await,
                )
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let busy = results.iter().filter(|r| r.is_none()).count();
        let report = SyncReport {
            job: job.name,
            started_at,
            not_due,
            busy,
            outcomes: results.into_iter().flatten().collect(),
        };

        tracing::info!(
            job = job.name,
            accounts = total,
            not_due,
            busy,
            synced = report.synced(),
            skipped = report.skipped(),
            "Sync cycle finished"
        );

        Ok(report)
    }

    /// Synchronize `kinds` for one account. Never returns an error: failures
    /// are logged and reported as `Skipped`.
    pub async fn sync_account(&self, account_id: &str, kinds: &[ResourceKind]) -> AccountOutcome {
        self.sync_account_at(account_id, kinds, Utc::now()).await
    }

    /// As [`sync_account`](Self::sync_account), stamping reconciled kinds
    /// with `started_at`.
    async fn sync_account_at(
        &self,
        account_id: &str,
        kinds: &[ResourceKind],
        started_at: DateTime<Utc>,
    ) -> AccountOutcome {
        match self.run_phases(account_id, kinds, started_at).await {
            Ok(rows) => AccountOutcome {
                account_id: account_id.to_string(),
                phase: SyncPhase::Done,
                failed_in: None,
                error: None,
                rows,
            },
            Err(PhaseError { phase, error }) => {
                if error.is_reauth_required() {
                    tracing::warn!(
                        account_id,
                        "Account needs re-authorization, skipping until it signs in again"
                    );
                } else {
                    tracing::error!(
                        account_id,
                        phase = ?phase,
                        error = %error,
                        "Account sync failed, skipping"
                    );
                }
                AccountOutcome {
                    account_id: account_id.to_string(),
                    phase: SyncPhase::Skipped,
                    failed_in: Some(phase),
                    error: Some(error.to_string()),
                    rows: 0,
                }
            }
        }
    }

    async fn run_phases(
        &self,
        account_id: &str,
        kinds: &[ResourceKind],
        started_at: DateTime<Utc>,
    ) -> Result<usize, PhaseError> {
        let mut phase = SyncPhase::Pending;
        tracing::debug!(account_id, ?phase, ?kinds, "Starting account sync");

        phase = SyncPhase::Refreshing;
        self.spotify
            .get_valid_access_token(account_id)
            .await
            .in_phase(phase)?;

        let mut rows = 0;
        for &kind in kinds {
            phase = SyncPhase::Fetching;
            let raw = self
                .spotify
                .fetch_resource(account_id, kind, self.max_pages)
                .await
                .in_phase(phase)?;
            let items = parse_items(kind, account_id, raw);

            phase = SyncPhase::Reconciling;
            rows += self.reconcile(account_id, kind, items).await.in_phase(phase)?;
            self.db
                .mark_synced(account_id, kind, started_at)
                .await
                .in_phase(phase)?;
        }

        tracing::debug!(account_id, phase = ?SyncPhase::Done, rows, "Account sync complete");
        Ok(rows)
    }

    /// Merge a freshly fetched collection into storage according to the
    /// kind's policy.
    async fn reconcile(
        &self,
        account_id: &str,
        kind: ResourceKind,
        mut items: Vec<SyncedItem>,
    ) -> Result<usize, AppError> {
        match kind.policy() {
            ReconcilePolicy::Upsert => {
                let inserted = self.db.insert_new_items(&items).await?;
                tracing::debug!(account_id, kind = %kind, fetched = items.len(), inserted, "Upserted items");
                Ok(inserted)
            }
            ReconcilePolicy::Replace => {
                if kind == ResourceKind::Playlists {
                    self.assign_short_codes(account_id, &mut items).await?;
                }
                self.db.replace_items(account_id, kind, &items).await?;
                Ok(items.len())
            }
        }
    }

    /// Keep the short code of every playlist that was already stored and
    /// mint fresh ones for the rest.
    async fn assign_short_codes(
        &self,
        account_id: &str,
        items: &mut [SyncedItem],
    ) -> Result<(), AppError> {
        let existing: HashMap<String, String> = self
            .db
            .list_items(account_id, ResourceKind::Playlists)
            .await?
            .into_iter()
            .filter_map(|item| item.short_code.map(|code| (item.item_id, code)))
            .collect();

        let mut used: HashSet<String> = existing.values().cloned().collect();
        for item in items.iter_mut() {
            let code = match existing.get(&item.item_id) {
                Some(code) => code.clone(),
                None => self.unused_code(&used).await?,
            };
            used.insert(code.clone());
            item.short_code = Some(code);
        }
        Ok(())
    }

    async fn unused_code(&self, used: &HashSet<String>) -> Result<String, AppError> {
        for _ in 0..SHORT_CODE_ATTEMPTS {
            let code = short_code::generate(&self.rng)?;
            if used.contains(&code) {
                continue;
            }
            if self.db.find_playlist_by_code(&code).await?.is_none() {
                return Ok(code);
            }
        }
        Err(AppError::Internal(anyhow::anyhow!(
            "No unused playlist short code after {} attempts",
            SHORT_CODE_ATTEMPTS
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_jobs_cover_every_kind_once() {
        let jobs = SyncJob::defaults(&Config::test_default());
        let mut kinds: Vec<ResourceKind> =
            jobs.iter().flat_map(|j| j.resources.clone()).collect();
        kinds.sort();
        assert_eq!(kinds, ResourceKind::ALL.to_vec());
        assert_eq!(jobs[0].name, "recent-tracks");
        assert_eq!(jobs[1].resources.len(), 2);
    }

    #[test]
    fn test_due_threshold_rounds_to_nearest_tick() {
        let timing = |interval, resync_after| JobTiming {
            interval: std::time::Duration::from_secs(interval),
            resync_after: std::time::Duration::from_secs(resync_after),
        };

        assert_eq!(due_threshold(&timing(300, 300)), chrono::Duration::seconds(150));
        assert_eq!(due_threshold(&timing(60, 900)), chrono::Duration::seconds(870));
        assert_eq!(due_threshold(&timing(60, 0)), chrono::Duration::zero());
    }

    #[test]
    fn test_in_flight_claim_is_exclusive() {
        let config = Config::test_default();
        let db: Arc<dyn Store> = Arc::new(crate::db::MemoryStore::new());
        let spotify = SpotifyService::new(&config, db.clone());
        let sync = SyncService::new(&config, db, spotify);

        let guard = sync.try_claim("alice");
        assert!(guard.is_some());
        assert!(sync.try_claim("alice").is_none());
        assert!(sync.try_claim("bob").is_some());

        drop(guard);
        assert!(sync.try_claim("alice").is_some());
    }
}

// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Owned timer for the sync jobs.
//!
//! One background loop per [`SyncJob`]. Missed ticks are skipped rather than
//! bursted, so a slow cycle delays the next one instead of stacking them.

use crate::services::sync::{SyncJob, SyncService};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub struct Scheduler {
    sync: SyncService,
    jobs: Vec<Arc<SyncJob>>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(sync: SyncService, jobs: Vec<SyncJob>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            sync,
            jobs: jobs.into_iter().map(Arc::new).collect(),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the job loops. Calling `start` while running does nothing.
    ///
    /// Each job fires once immediately, then every `timing.interval`.
    pub async fn start(&self) {
        let mut tasks = self.tasks.lock().await;
        if tasks.iter().any(|handle| !handle.is_finished()) {
            tracing::debug!("Scheduler already running");
            return;
        }
        tasks.clear();
        self.shutdown.send_replace(false);

        for job in &self.jobs {
            let sync = self.sync.clone();
            let job = job.clone();
            let mut shutdown = self.shutdown.subscribe();

            tracing::info!(
                job = job.name,
                interval_secs = job.timing.interval.as_secs(),
                resync_after_secs = job.timing.resync_after.as_secs(),
                "Scheduling sync job"
            );

            tasks.push(tokio::spawn(async move {
                let mut timer = tokio::time::interval(job.timing.interval);
                timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

                loop {
                    tokio::select! {
                        _ = timer.tick() => {}
                        _ = shutdown.changed() => break,
                    }

                    // Finish the current cycle before honouring shutdown.
                    if let Err(e) = sync.run_job(&job).await {
                        tracing::error!(job = job.name, error = %e, "Sync job failed");
                    }

                    if *shutdown.borrow() {
                        break;
                    }
                }

                tracing::info!(job = job.name, "Sync job stopped");
            }));
        }
    }

    /// Signal every loop to exit and wait for in-progress cycles to finish.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);

        let handles: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Sync job task panicked");
            }
        }
    }

    pub async fn is_running(&self) -> bool {
        self.tasks
            .lock()
            .await
            .iter()
            .any(|handle| !handle.is_finished())
    }
}

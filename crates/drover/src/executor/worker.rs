/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! The polling worker loop.
//!
//! A worker leases jobs from one queue type and runs them on a bounded pool:
//! - every poll takes whatever execution slots are free and asks the store for
//!   exactly that many leases
//! - each leased job runs as its own task inside a `job` span
//! - a failed poll backs off exponentially up to the configured maximum
//! - shutdown stops polling, waits out the grace period for in-flight jobs,
//!   then aborts the rest (their leases lapse and another worker reclaims them)

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::config::WorkerConfig;
use super::execution::{execute_leased, ExecutionReport};
use super::registry::JobRegistry;
use super::slot_token::ExecutionSlots;
use crate::dal::DAL;
use crate::error::StoreError;

/// A worker bound to one queue type.
pub struct Worker {
    dal: DAL,
    registry: JobRegistry,
    config: Arc<WorkerConfig>,
    slots: ExecutionSlots,
}

impl Worker {
    pub fn new(dal: DAL, registry: JobRegistry, config: WorkerConfig) -> Self {
        let slots = ExecutionSlots::new(config.max_concurrent_jobs());
        Self {
            dal,
            registry,
            config: Arc::new(config),
            slots,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn slots(&self) -> &ExecutionSlots {
        &self.slots
    }

    /// Runs the worker on the tokio runtime.
    ///
    /// The worker stops when [`WorkerHandle::shutdown`] is called or the
    /// handle is dropped.
    pub fn spawn(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(async move { self.run(shutdown_rx).await });
        WorkerHandle {
            shutdown: shutdown_tx,
            join,
        }
    }

    /// Polls and executes jobs until `shutdown` flips to `true` or its sender
    /// is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            worker_id = self.config.worker_id(),
            queue = %self.config.queue_type(),
            max_concurrent_jobs = self.config.max_concurrent_jobs(),
            "Starting worker"
        );

        let mut running: JoinSet<ExecutionReport> = JoinSet::new();
        let mut backoff = self.config.poll_interval();
        let mut next_poll = Instant::now();

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                Some(joined) = running.join_next(), if !running.is_empty() => {
                    log_joined(joined);
                }
                _ = sleep_until(next_poll) => {
                    match self.poll_once(&mut running).await {
                        Ok(_) => {
                            backoff = self.config.poll_interval();
                        }
                        Err(e) => {
                            backoff = (backoff * 2).min(self.config.max_poll_backoff());
                            warn!(error = %e, backoff_ms = backoff.as_millis() as u64, "Failed to poll for jobs");
                        }
                    }
                    next_poll = Instant::now() + self.with_jitter(backoff);
                }
            }
        }

        info!(in_flight = running.len(), "Shutdown requested; no new leases will be taken");
        let grace = self.config.shutdown_grace();
        let drained = tokio::time::timeout(grace, async {
            while let Some(joined) = running.join_next().await {
                log_joined(joined);
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = running.len(),
                "Shutdown grace elapsed; aborting in-flight jobs"
            );
            running.abort_all();
            while running.join_next().await.is_some() {}
        }
        info!("Worker stopped");
    }

    /// Leases as many jobs as there are free slots and starts them.
    ///
    /// Returns the number of jobs started.
    pub async fn poll_once(
        &self,
        running: &mut JoinSet<ExecutionReport>,
    ) -> Result<usize, StoreError> {
        let tokens = self
            .slots
            .try_acquire_up_to(self.config.max_concurrent_jobs());
        if tokens.is_empty() {
            debug!("All execution slots busy, skipping poll");
            return Ok(0);
        }

        let jobs = self
            .dal
            .job()
            .dequeue_roles(
                self.config.queue_type(),
                self.config.roles(),
                tokens.len(),
                self.config.heartbeat_timeout(),
                self.config.worker_id(),
            )
            .await?;
        let leased = jobs.len();

        // Unused tokens are dropped with the iterator.
        for (job, slot) in jobs.into_iter().zip(tokens) {
            let span = info_span!(
                "job",
                job.id = job.id,
                job.group = job.group_id,
                job.queue = %job.queue_type
            );
            let dal = self.dal.clone();
            let registry = self.registry.clone();
            let config = Arc::clone(&self.config);

            running.spawn(
                async move {
                    let _slot = slot;
                    execute_leased(&dal, &registry, &config, job).await
                }
                .instrument(span),
            );
        }

        if leased > 0 {
            debug!(leased, "Started leased jobs");
        }
        Ok(leased)
    }

    fn with_jitter(&self, delay: Duration) -> Duration {
        let jitter = self.config.poll_jitter();
        if jitter.is_zero() {
            return delay;
        }

        let jitter_millis = u64::try_from(jitter.as_millis()).unwrap_or(u64::MAX);
        delay + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_millis))
    }
}

fn log_joined(joined: Result<ExecutionReport, JoinError>) {
    match joined {
        Ok(report) => debug!(?report, "Job execution ended"),
        Err(e) if e.is_panic() => error!(error = %e, "Job execution task panicked"),
        Err(e) => debug!(error = %e, "Job execution task cancelled"),
    }
}

/// Handle to a spawned [`Worker`].
///
/// Dropping the handle also shuts the worker down.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Asks the worker to stop without waiting for it.
    pub fn request_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Stops the worker and waits for it to finish shutting down.
    pub async fn shutdown(self) -> Result<(), JoinError> {
        self.request_shutdown();
        self.join.await
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

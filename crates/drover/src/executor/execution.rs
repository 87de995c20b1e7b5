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

//! Execution of one leased job.
//!
//! The body runs alongside a heartbeat ticker. Each heartbeat refreshes the
//! version the worker holds and relays `cancel_requested` into the body's
//! signal. A lost lease drops the body future on the spot, so no further side
//! effects happen under a lease another worker now owns.
//!
//! Whatever the body does, the job ends in exactly one of:
//! - a completion write carrying the last known version,
//! - a discarded completion (version conflict: someone else finished or
//!   reclaimed the job),
//! - abandonment on a transient store error, leaving the lease to lapse so
//!   the job is re-run.

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::cancellation::{CancelReason, CancellationSource};
use super::config::WorkerConfig;
use super::progress::ProgressReporter;
use super::registry::JobRegistry;
use crate::dal::DAL;
use crate::error::{JobError, StoreError};
use crate::models::job::{Job, JobStatus, LeaseIdentity};
use crate::models::outcome::{IssueCode, JobOutcome, JobResult};

/// Initial delay between completion attempts while the store is unavailable.
const COMPLETION_RETRY_BASE: Duration = Duration::from_millis(250);

/// How the execution of one leased job ended, from the worker's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionReport {
    /// The terminal status was written.
    Recorded(JobStatus),
    /// The completion lost a version race and was dropped.
    Discarded,
    /// Nothing was written; the lease will lapse and the job re-run.
    Abandoned,
}

enum BodyEnd {
    Finished(Result<Result<JobOutcome, JobError>, Box<dyn Any + Send>>),
    LeaseLost,
}

/// The outcome to record and whether it should cancel the job's siblings.
struct Verdict {
    outcome: JobOutcome,
    cascade: bool,
}

/// Runs a leased job to its end and records the outcome.
pub async fn execute_leased(
    dal: &DAL,
    registry: &JobRegistry,
    config: &WorkerConfig,
    job: Job,
) -> ExecutionReport {
    let Some(lease) = job.lease.clone() else {
        error!("Leased job carries no lease identity; skipping");
        return ExecutionReport::Abandoned;
    };

    if job.cancel_requested {
        info!("Job was cancelled before it started");
        let verdict = Verdict {
            outcome: JobOutcome::cancelled(JobResult::new()),
            cascade: false,
        };
        return record(dal, config, &job, job.version, verdict).await;
    }

    let Some(body) = registry.resolve(job.queue_type, job.role) else {
        warn!(role = ?job.role, "No job body registered");
        let verdict = Verdict {
            outcome: JobOutcome::failed_with(
                JobResult::new(),
                IssueCode::UnknownJobType,
                format!(
                    "No job body is registered for queue '{}' and role {:?}",
                    job.queue_type, job.role
                ),
            ),
            cascade: true,
        };
        return record(dal, config, &job, job.version, verdict).await;
    };

    let source = CancellationSource::new();
    let progress = ProgressReporter::new();
    let mut version = job.version;

    debug!("Executing job body");
    let end = {
        let mut body_future = AssertUnwindSafe(body.execute(
            &job,
            source.signal(),
            progress.clone(),
        ))
        .catch_unwind();

        let period = config.heartbeat_interval();
        let mut heartbeats = interval_at(Instant::now() + period, period);
        heartbeats.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                finished = &mut body_future => break BodyEnd::Finished(finished),
                _ = heartbeats.tick() => {
                    match renew(dal, &job, &lease).await {
                        Renewal::Renewed { version: renewed, cancel_requested } => {
                            version = renewed;
                            if cancel_requested && source.cancel(CancelReason::Requested) {
                                info!("Cancellation requested; signalling job body");
                            }
                        }
                        Renewal::Unreachable => {}
                        Renewal::Lost => {
                            source.cancel(CancelReason::LeaseLost);
                            break BodyEnd::LeaseLost;
                        }
                    }
                }
            }
        }
    };

    let verdict = match end {
        BodyEnd::LeaseLost => {
            warn!("Lease lost; abandoning job body");
            Verdict {
                outcome: JobOutcome::failed_with(
                    progress.snapshot().unwrap_or_default(),
                    IssueCode::LeaseLost,
                    "The job's lease was reclaimed by another worker",
                ),
                cascade: false,
            }
        }
        BodyEnd::Finished(Err(panic)) => {
            let message = panic_message(&*panic);
            error!(panic = %message, "Job body panicked");
            Verdict {
                outcome: JobOutcome::failed_with(
                    progress.snapshot().unwrap_or_default(),
                    IssueCode::Exception,
                    format!("Job body panicked: {}", message),
                ),
                cascade: body.cascade_cancel_on_failure(),
            }
        }
        BodyEnd::Finished(Ok(Ok(outcome))) => {
            if outcome.status.is_terminal() {
                let cascade =
                    outcome.status == JobStatus::Failed && body.cascade_cancel_on_failure();
                Verdict { outcome, cascade }
            } else {
                Verdict {
                    outcome: JobOutcome::failed_with(
                        outcome.result,
                        IssueCode::Exception,
                        format!("Job body returned non-terminal status {}", outcome.status),
                    ),
                    cascade: body.cascade_cancel_on_failure(),
                }
            }
        }
        BodyEnd::Finished(Ok(Err(error))) => {
            match classify_error(error, progress.snapshot().unwrap_or_default()) {
                Some((outcome, may_cascade)) => Verdict {
                    cascade: may_cascade && body.cascade_cancel_on_failure(),
                    outcome,
                },
                None => return ExecutionReport::Abandoned,
            }
        }
    };

    record(dal, config, &job, version, verdict).await
}

enum Renewal {
    Renewed { version: i64, cancel_requested: bool },
    /// The store could not be reached; the next tick retries.
    Unreachable,
    Lost,
}

async fn renew(dal: &DAL, job: &Job, lease: &LeaseIdentity) -> Renewal {
    match dal.job().heartbeat(job.id, lease).await {
        Ok(ack) => Renewal::Renewed {
            version: ack.version,
            cancel_requested: ack.cancel_requested,
        },
        Err(StoreError::LeaseLost { .. }) => Renewal::Lost,
        Err(e) => {
            warn!(error = %e, "Heartbeat failed; retrying on the next interval");
            Renewal::Unreachable
        }
    }
}

/// Maps a body error to the outcome to record, or `None` to abandon.
///
/// The flag says whether the outcome is a genuine failure that may cascade.
fn classify_error(error: JobError, partial: JobResult) -> Option<(JobOutcome, bool)> {
    match error {
        JobError::Cancelled(CancelReason::Requested) => {
            info!("Job body stopped after cancellation was requested");
            Some((JobOutcome::cancelled(partial), false))
        }
        JobError::Cancelled(CancelReason::LeaseLost) => Some((
            JobOutcome::failed_with(
                partial,
                IssueCode::LeaseLost,
                "The job's lease was reclaimed by another worker",
            ),
            false,
        )),
        JobError::Store(store_error) if store_error.is_transient() => {
            warn!(error = %store_error, "Store unavailable during job body; leaving lease to lapse");
            None
        }
        error => {
            warn!(error = %error, "Job body failed");
            Some((
                JobOutcome::failed_with(partial, IssueCode::Exception, error.to_string()),
                true,
            ))
        }
    }
}

/// Writes the outcome, retrying while the store is unavailable.
async fn record(
    dal: &DAL,
    config: &WorkerConfig,
    job: &Job,
    version: i64,
    verdict: Verdict,
) -> ExecutionReport {
    let Verdict { outcome, cascade } = verdict;
    let result = match outcome.result.to_json() {
        Ok(json) => json,
        Err(e) => {
            error!(error = %e, "Job result could not be serialized; recording without it");
            JobOutcome::failed(format!("Job result could not be serialized: {}", e))
                .result
                .to_json()
                .unwrap_or_else(|_| "{}".to_string())
        }
    };

    let attempts = config.completion_attempts();
    let mut delay = COMPLETION_RETRY_BASE;
    for attempt in 1..=attempts {
        match dal
            .job()
            .complete(job.id, version, outcome.status, result.clone(), cascade)
            .await
        {
            Ok(completion) => {
                info!(
                    status = %outcome.status,
                    cascaded = completion.cascaded,
                    "Job finished"
                );
                return ExecutionReport::Recorded(outcome.status);
            }
            Err(StoreError::VersionConflict { .. }) => {
                debug!(version, "Completion lost a version race; discarding result");
                return ExecutionReport::Discarded;
            }
            Err(e) if e.is_transient() && attempt < attempts => {
                warn!(error = %e, attempt, "Store unavailable while completing job; retrying");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(config.max_poll_backoff());
            }
            Err(e) => {
                error!(error = %e, attempt, "Failed to record job completion");
                return ExecutionReport::Abandoned;
            }
        }
    }

    ExecutionReport::Abandoned
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

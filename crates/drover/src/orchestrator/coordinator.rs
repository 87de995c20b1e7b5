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

//! The coordinator job body.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use super::partition::{ChildDefinition, FanOutDefinition, WorkUnit};
use crate::dal::DAL;
use crate::error::{JobError, StoreError};
use crate::executor::{CancelReason, CancellationSignal, JobBody, ProgressReporter};
use crate::models::job::{Job, JobRole, NewJob};
use crate::models::outcome::{JobOutcome, JobResult};

const DEFAULT_MAX_ENQUEUE_ATTEMPTS: u32 = 3;

/// What one fan-out pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanOutReport {
    /// Size of the full candidate set.
    pub candidates: usize,
    /// Candidates found already enqueued in the group.
    pub already_scheduled: usize,
    /// Children enqueued by this pass.
    pub enqueued: usize,
}

/// Schedules the children of a coordinator job, each exactly once.
#[derive(Debug, Clone)]
pub struct FanOutCoordinator {
    dal: DAL,
    max_enqueue_attempts: u32,
}

impl FanOutCoordinator {
    pub fn new(dal: DAL) -> Self {
        Self {
            dal,
            max_enqueue_attempts: DEFAULT_MAX_ENQUEUE_ATTEMPTS,
        }
    }

    /// How many times a batch enqueue is re-planned after losing a race with
    /// another writer before falling back to one unit at a time.
    pub fn with_max_enqueue_attempts(mut self, attempts: u32) -> Self {
        self.max_enqueue_attempts = attempts.max(1);
        self
    }

    /// Enqueues every candidate unit of `coordinator` not yet present in its
    /// group. Running it again with the same group state enqueues nothing.
    pub async fn fan_out(&self, coordinator: &Job) -> Result<FanOutReport, JobError> {
        let definition: FanOutDefinition = serde_json::from_str(&coordinator.definition)?;
        let candidates = definition.work_units();

        for attempt in 1..=self.max_enqueue_attempts {
            let scheduled = self.scheduled_keys(coordinator.group_id).await?;
            let missing: Vec<&WorkUnit> = candidates
                .iter()
                .filter(|unit| !scheduled.contains(&unit.key()))
                .collect();
            let already_scheduled = candidates.len() - missing.len();

            if missing.is_empty() {
                return Ok(FanOutReport {
                    candidates: candidates.len(),
                    already_scheduled,
                    enqueued: 0,
                });
            }

            let children = missing
                .iter()
                .map(|unit| child_job(&definition, unit, coordinator))
                .collect::<Result<Vec<_>, _>>()?;

            match self
                .dal
                .job()
                .enqueue(
                    coordinator.queue_type,
                    Some(coordinator.group_id),
                    children,
                    JobRole::Processing,
                )
                .await
            {
                Ok(ids) => {
                    return Ok(FanOutReport {
                        candidates: candidates.len(),
                        already_scheduled,
                        enqueued: ids.len(),
                    })
                }
                Err(StoreError::DuplicateEnqueue {
                    idempotency_key, ..
                }) => {
                    debug!(
                        key = %idempotency_key,
                        attempt,
                        "Child was enqueued concurrently; re-reading group"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.fan_out_one_by_one(coordinator, &definition, &candidates)
            .await
    }

    /// Last resort under heavy contention: enqueue each missing unit on its
    /// own, counting duplicates as already scheduled.
    async fn fan_out_one_by_one(
        &self,
        coordinator: &Job,
        definition: &FanOutDefinition,
        candidates: &BTreeSet<WorkUnit>,
    ) -> Result<FanOutReport, JobError> {
        warn!(
            attempts = self.max_enqueue_attempts,
            "Batch fan-out kept colliding; enqueueing children individually"
        );
        let scheduled = self.scheduled_keys(coordinator.group_id).await?;
        let mut report = FanOutReport {
            candidates: candidates.len(),
            already_scheduled: 0,
            enqueued: 0,
        };

        for unit in candidates {
            if scheduled.contains(&unit.key()) {
                report.already_scheduled += 1;
                continue;
            }
            let child = child_job(definition, unit, coordinator)?;
            match self
                .dal
                .job()
                .enqueue(
                    coordinator.queue_type,
                    Some(coordinator.group_id),
                    vec![child],
                    JobRole::Processing,
                )
                .await
            {
                Ok(_) => report.enqueued += 1,
                Err(StoreError::DuplicateEnqueue { .. }) => report.already_scheduled += 1,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(report)
    }

    /// Natural keys of the children already in the group.
    async fn scheduled_keys(&self, group_id: i64) -> Result<BTreeSet<String>, StoreError> {
        let children = self.dal.job().get_by_group(group_id, false).await?;
        let mut keys = BTreeSet::new();
        for child in children {
            let key = child.idempotency_key.clone().or_else(|| {
                serde_json::from_str::<ChildDefinition>(&child.definition)
                    .ok()
                    .map(|definition| definition.unit.key())
            });
            match key {
                Some(key) => {
                    keys.insert(key);
                }
                None => warn!(job_id = child.id, "Child job has no recognisable work unit"),
            }
        }
        Ok(keys)
    }
}

fn child_job(
    definition: &FanOutDefinition,
    unit: &WorkUnit,
    coordinator: &Job,
) -> Result<NewJob, serde_json::Error> {
    let child = ChildDefinition::for_unit(definition, unit.clone(), coordinator.created_at);
    Ok(NewJob::keyed(serde_json::to_string(&child)?, unit.key()))
}

#[async_trait]
impl JobBody for FanOutCoordinator {
    async fn execute(
        &self,
        job: &Job,
        signal: CancellationSignal,
        _progress: ProgressReporter,
    ) -> Result<JobOutcome, JobError> {
        signal.check()?;
        // The signal only learns about cancellation on a heartbeat; the store
        // knows immediately.
        if self.dal.job().get(job.id).await?.cancel_requested {
            return Err(JobError::Cancelled(CancelReason::Requested));
        }
        let report = self.fan_out(job).await?;
        info!(
            candidates = report.candidates,
            already_scheduled = report.already_scheduled,
            enqueued = report.enqueued,
            "Fan-out complete"
        );

        let output = serde_json::to_value(report)?;
        Ok(JobOutcome::completed(JobResult::new().with_output(output)))
    }
}

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

//! The job store.
//!
//! Key features:
//! - Atomic batch enqueue with per-group idempotency keys
//! - Lease-acquiring dequeue that is safe under concurrent workers
//! - Heartbeat renewal and versioned terminal completion
//! - Cascade cancellation of a group's siblings on failure
//!
//! Every lease or status transition bumps `version`; writes carrying a stale
//! version are rejected. The cancellation flag is advisory and leaves the
//! version alone.

mod completion;
mod leasing;
mod retention;

pub use completion::Completion;
pub use retention::ReapReport;

use chrono::Utc;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use std::collections::HashSet;
use tracing::debug;

use super::models::{into_jobs, JobRow, NewJobRow};
use super::DAL;
use crate::database::schema::jobs;
use crate::error::StoreError;
use crate::models::job::{Job, JobRole, JobStatus, NewJob, QueueType};

/// Data access for job records.
#[derive(Clone)]
pub struct JobDAL<'a> {
    dal: &'a DAL,
}

impl<'a> JobDAL<'a> {
    pub fn new(dal: &'a DAL) -> Self {
        Self { dal }
    }

    /// Inserts a batch of jobs atomically under one group.
    ///
    /// With `group_id = None` a new group is started and the first inserted
    /// job's id becomes the group id of the whole batch, so a coordinator is
    /// addressable by its own id. A coordinator batch must hold exactly one
    /// job, and a group may hold only one coordinator.
    ///
    /// Jobs added to a group that already carries a cancellation request are
    /// inserted with `cancel_requested` set, so a cancel issued while the
    /// coordinator is still fanning out reaches every child.
    ///
    /// Fails with [`StoreError::DuplicateEnqueue`] if any idempotency key is
    /// already present in the group; in that case nothing is inserted.
    pub async fn enqueue(
        &self,
        queue_type: QueueType,
        group_id: Option<i64>,
        new_jobs: Vec<NewJob>,
        role: JobRole,
    ) -> Result<Vec<i64>, StoreError> {
        if new_jobs.is_empty() {
            return Err(StoreError::InvalidRequest(
                "enqueue requires at least one job".to_string(),
            ));
        }
        if role == JobRole::Coordinator && new_jobs.len() != 1 {
            return Err(StoreError::InvalidRequest(format!(
                "a coordinator batch must contain exactly one job, got {}",
                new_jobs.len()
            )));
        }

        let mut seen = HashSet::new();
        for key in new_jobs.iter().filter_map(|job| job.idempotency_key.as_deref()) {
            if !seen.insert(key) {
                return Err(StoreError::DuplicateEnqueue {
                    group_id: group_id.unwrap_or_default(),
                    idempotency_key: key.to_string(),
                });
            }
        }

        let count = new_jobs.len();
        let ids: Vec<i64> = with_connection!(self.dal, |conn| {
            conn.transaction::<_, StoreError, _>(|conn| {
                let now = Utc::now().naive_utc();
                let mut ids = Vec::with_capacity(new_jobs.len());
                let mut pending = new_jobs.into_iter();

                let mut inherited_cancel = false;
                let group = match group_id {
                    Some(group) => {
                        // Cancellation is sticky: jobs joining a cancelled group start flagged.
                        let flagged: i64 = jobs::table
                            .filter(jobs::group_id.eq(group))
                            .filter(jobs::cancel_requested.eq(true))
                            .count()
                            .get_result(conn)?;
                        inherited_cancel = flagged > 0;

                        if role == JobRole::Coordinator {
                            let coordinators: i64 = jobs::table
                                .filter(jobs::group_id.eq(group))
                                .filter(jobs::job_type_id.eq(JobRole::Coordinator.type_id()))
                                .count()
                                .get_result(conn)?;
                            if coordinators > 0 {
                                return Err(StoreError::InvalidRequest(format!(
                                    "group {} already has a coordinator",
                                    group
                                )));
                            }
                        }
                        group
                    }
                    None => {
                        // The group id is only known once the first row exists.
                        let Some(first) = pending.next() else {
                            return Ok(ids);
                        };
                        let row = NewJobRow::created(
                            0,
                            queue_type,
                            role,
                            first.definition,
                            None,
                            now,
                        );
                        let id: i64 = diesel::insert_into(jobs::table)
                            .values(&row)
                            .returning(jobs::id)
                            .get_result(conn)?;
                        diesel::update(jobs::table.filter(jobs::id.eq(id)))
                            .set((
                                jobs::group_id.eq(id),
                                jobs::idempotency_key.eq(first.idempotency_key),
                            ))
                            .execute(conn)?;
                        ids.push(id);
                        id
                    }
                };

                for job in pending {
                    if let Some(key) = job.idempotency_key.as_deref() {
                        let existing: i64 = jobs::table
                            .filter(jobs::group_id.eq(group))
                            .filter(jobs::idempotency_key.eq(key))
                            .count()
                            .get_result(conn)?;
                        if existing > 0 {
                            return Err(StoreError::DuplicateEnqueue {
                                group_id: group,
                                idempotency_key: key.to_string(),
                            });
                        }
                    }

                    let key = job.idempotency_key.clone();
                    let mut row = NewJobRow::created(
                        group,
                        queue_type,
                        role,
                        job.definition,
                        job.idempotency_key,
                        now,
                    );
                    row.cancel_requested = inherited_cancel;
                    let id: i64 = diesel::insert_into(jobs::table)
                        .values(&row)
                        .returning(jobs::id)
                        .get_result(conn)
                        .map_err(|e| duplicate_or_store_error(e, group, key))?;
                    ids.push(id);
                }

                Ok(ids)
            })
        });

        debug!(
            queue = %queue_type,
            role = ?role,
            count,
            group = ?group_id.or_else(|| ids.first().copied()),
            "Enqueued jobs"
        );
        Ok(ids)
    }

    /// Retrieves a job by id.
    pub async fn get(&self, job_id: i64) -> Result<Job, StoreError> {
        let row: Option<JobRow> = with_connection!(self.dal, |conn| {
            jobs::table
                .find(job_id)
                .select(JobRow::as_select())
                .first(conn)
                .optional()
        });

        row.ok_or(StoreError::JobNotFound(job_id))?.try_into()
    }

    /// Returns every job in a group ordered by `created_at`, then `id`.
    ///
    /// The coordinator is left out unless `include_coordinator` is set.
    pub async fn get_by_group(
        &self,
        group_id: i64,
        include_coordinator: bool,
    ) -> Result<Vec<Job>, StoreError> {
        let rows: Vec<JobRow> = with_connection!(self.dal, |conn| {
            let mut query = jobs::table
                .filter(jobs::group_id.eq(group_id))
                .select(JobRow::as_select())
                .order((jobs::created_at.asc(), jobs::id.asc()))
                .into_boxed();
            if !include_coordinator {
                query = query.filter(jobs::job_type_id.ne(JobRole::Coordinator.type_id()));
            }
            query.load(conn)
        });

        into_jobs(rows)
    }

    /// Number of jobs per status in a queue.
    pub async fn count_by_status(
        &self,
        queue_type: QueueType,
    ) -> Result<Vec<(JobStatus, i64)>, StoreError> {
        let counts: Vec<(String, i64)> = with_connection!(self.dal, |conn| {
            jobs::table
                .filter(jobs::queue_type.eq(queue_type.as_str()))
                .group_by(jobs::status)
                .select((jobs::status, diesel::dsl::count_star()))
                .load(conn)
        });

        counts
            .into_iter()
            .map(|(status, count)| {
                JobStatus::from_str(&status)
                    .map(|status| (status, count))
                    .ok_or_else(|| {
                        StoreError::InvalidRequest(format!("unknown status '{}' in store", status))
                    })
            })
            .collect()
    }
}

/// A unique violation on an idempotency key means a concurrent writer
/// enqueued the same key first.
fn duplicate_or_store_error(error: DieselError, group_id: i64, key: Option<String>) -> StoreError {
    match (&error, key) {
        (DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _), Some(key)) => {
            StoreError::DuplicateEnqueue {
                group_id,
                idempotency_key: key,
            }
        }
        _ => error.into(),
    }
}

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

//! Lease acquisition and renewal.
//!
//! A job is eligible for a lease when it is `Created`, or `Running` with a
//! heartbeat older than the caller's timeout (its worker is presumed dead).
//! Leases from one dequeue call commit together or not at all.

use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use super::JobDAL;
use crate::dal::models::{into_jobs, JobRow};
use crate::database::schema::jobs;
use crate::error::StoreError;
use crate::models::job::{HeartbeatAck, Job, JobRole, JobStatus, LeaseIdentity, QueueType};

/// Moves each candidate row to `Running` under a fresh lease.
///
/// Each update is a compare-and-set on the version read in the same
/// transaction; a row whose version moved is skipped.
macro_rules! lease_candidates {
    ($conn:ident, $candidates:expr, $worker_id:expr, $now:expr) => {{
        let mut leased: Vec<JobRow> = Vec::new();
        for candidate in $candidates {
            let lease_id = Uuid::new_v4().to_string();
            let updated: Option<JobRow> = diesel::update(
                jobs::table
                    .filter(jobs::id.eq(candidate.id))
                    .filter(jobs::version.eq(candidate.version)),
            )
            .set((
                jobs::status.eq(JobStatus::Running.as_str()),
                jobs::heartbeat_at.eq($now),
                jobs::version.eq(candidate.version + 1),
                jobs::lease_id.eq(Some(lease_id)),
                jobs::lease_owner.eq(Some($worker_id.clone())),
                jobs::updated_at.eq($now),
            ))
            .returning(JobRow::as_returning())
            .get_result($conn)
            .optional()?;
            if let Some(row) = updated {
                leased.push(row);
            }
        }
        leased
    }};
}

impl<'a> JobDAL<'a> {
    /// Leases up to `max_count` eligible jobs of `queue_type`, oldest first.
    ///
    /// Each leased job is returned as `Running` with a fresh heartbeat, a
    /// bumped version and a new [`LeaseIdentity`] naming `worker_id`. Ties on
    /// `created_at` are broken by `id`. Concurrent callers never receive the
    /// same job for overlapping lease windows.
    pub async fn dequeue(
        &self,
        queue_type: QueueType,
        max_count: usize,
        heartbeat_timeout: Duration,
        worker_id: &str,
    ) -> Result<Vec<Job>, StoreError> {
        self.dequeue_roles(queue_type, &JobRole::ALL, max_count, heartbeat_timeout, worker_id)
            .await
    }

    /// Like [`dequeue`](Self::dequeue), restricted to jobs with one of `roles`.
    pub async fn dequeue_roles(
        &self,
        queue_type: QueueType,
        roles: &[JobRole],
        max_count: usize,
        heartbeat_timeout: Duration,
        worker_id: &str,
    ) -> Result<Vec<Job>, StoreError> {
        if max_count == 0 || roles.is_empty() {
            return Ok(Vec::new());
        }

        let timeout = chrono::Duration::from_std(heartbeat_timeout)
            .map_err(|e| StoreError::InvalidRequest(format!("heartbeat timeout: {}", e)))?;
        let now = Utc::now().naive_utc();
        let stale_before = now - timeout;
        let limit = max_count as i64;
        let worker_id = worker_id.to_string();
        let type_ids: Vec<i32> = roles.iter().map(JobRole::type_id).collect();

        let rows = dispatch_backend!(
            self.dal.backend(),
            self.dequeue_postgres(queue_type, type_ids, limit, stale_before, worker_id)
                .await?,
            self.dequeue_sqlite(queue_type, type_ids, limit, stale_before, worker_id)
                .await?
        );

        if !rows.is_empty() {
            debug!(queue = %queue_type, leased = rows.len(), "Leased jobs");
        }
        into_jobs(rows)
    }

    async fn dequeue_postgres(
        &self,
        queue_type: QueueType,
        type_ids: Vec<i32>,
        limit: i64,
        stale_before: NaiveDateTime,
        worker_id: String,
    ) -> Result<Vec<JobRow>, StoreError> {
        let conn = self.dal.database.get_postgres_connection().await?;

        conn.interact(move |conn| {
            conn.transaction::<_, StoreError, _>(|conn| {
                let now = Utc::now().naive_utc();

                // Rows locked by a concurrent dequeue are skipped, not waited on.
                let candidates: Vec<JobRow> = jobs::table
                    .select(JobRow::as_select())
                    .filter(jobs::queue_type.eq(queue_type.as_str()))
                    .filter(jobs::job_type_id.eq_any(&type_ids))
                    .filter(
                        jobs::status.eq(JobStatus::Created.as_str()).or(jobs::status
                            .eq(JobStatus::Running.as_str())
                            .and(jobs::heartbeat_at.lt(stale_before))),
                    )
                    .order((jobs::created_at.asc(), jobs::id.asc()))
                    .limit(limit)
                    .for_update()
                    .skip_locked()
                    .load(conn)?;

                Ok(lease_candidates!(conn, candidates, worker_id, now))
            })
        })
        .await?
    }

    async fn dequeue_sqlite(
        &self,
        queue_type: QueueType,
        type_ids: Vec<i32>,
        limit: i64,
        stale_before: NaiveDateTime,
        worker_id: String,
    ) -> Result<Vec<JobRow>, StoreError> {
        let conn = self.dal.database.get_sqlite_connection().await?;

        // SQLite has no row locks. An IMMEDIATE transaction takes the write
        // lock up front, so concurrent dequeues serialise between SELECT and UPDATE.
        conn.interact(move |conn| {
            conn.immediate_transaction::<_, StoreError, _>(|conn| {
                let now = Utc::now().naive_utc();

                let candidates: Vec<JobRow> = jobs::table
                    .select(JobRow::as_select())
                    .filter(jobs::queue_type.eq(queue_type.as_str()))
                    .filter(jobs::job_type_id.eq_any(&type_ids))
                    .filter(
                        jobs::status.eq(JobStatus::Created.as_str()).or(jobs::status
                            .eq(JobStatus::Running.as_str())
                            .and(jobs::heartbeat_at.lt(stale_before))),
                    )
                    .order((jobs::created_at.asc(), jobs::id.asc()))
                    .limit(limit)
                    .load(conn)?;

                Ok(lease_candidates!(conn, candidates, worker_id, now))
            })
        })
        .await?
    }

    /// Renews a lease.
    ///
    /// Succeeds only while the job is `Running` under the same lease id. The
    /// renewal bumps the version, so a reclaim racing this call loses its
    /// compare-and-set (and vice versa). Returns the new version together
    /// with the job's cancellation flag.
    pub async fn heartbeat(
        &self,
        job_id: i64,
        lease: &LeaseIdentity,
    ) -> Result<HeartbeatAck, StoreError> {
        let lease_id = lease.lease_id.clone();

        let renewed: Option<(i64, bool)> = with_connection!(self.dal, |conn| {
            let now = Utc::now().naive_utc();
            diesel::update(
                jobs::table
                    .filter(jobs::id.eq(job_id))
                    .filter(jobs::lease_id.eq(lease_id.as_str()))
                    .filter(jobs::status.eq(JobStatus::Running.as_str())),
            )
            .set((
                jobs::heartbeat_at.eq(now),
                jobs::version.eq(jobs::version + 1),
                jobs::updated_at.eq(now),
            ))
            .returning((jobs::version, jobs::cancel_requested))
            .get_result(conn)
            .optional()
        });

        match renewed {
            Some((version, cancel_requested)) => Ok(HeartbeatAck {
                version,
                cancel_requested,
            }),
            None => Err(StoreError::LeaseLost { job_id }),
        }
    }
}

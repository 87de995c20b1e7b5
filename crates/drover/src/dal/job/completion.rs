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

//! Terminal completion and group cancellation.
//!
//! Completion and the cascade it may trigger are one transaction: siblings
//! are flagged if and only if the failing job's terminal write commits.

use chrono::Utc;
use diesel::prelude::*;
use tracing::{debug, info};

use super::JobDAL;
use crate::database::schema::jobs;
use crate::error::StoreError;
use crate::models::job::JobStatus;

/// The result of a successful [`JobDAL::complete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    /// The job's version after the terminal write.
    pub version: i64,
    /// Number of siblings newly flagged for cancellation.
    pub cascaded: usize,
}

impl<'a> JobDAL<'a> {
    /// Writes a terminal status and result.
    ///
    /// The write is a compare-and-set on `(id, version)` and only applies to a
    /// job that is still `Created` or `Running`; otherwise it fails with
    /// [`StoreError::VersionConflict`] and nothing changes. When `status` is
    /// `Failed` and `cascade_cancel_on_failure` is set, every other
    /// non-terminal job in the group is flagged for cancellation in the same
    /// transaction.
    pub async fn complete(
        &self,
        job_id: i64,
        version: i64,
        status: JobStatus,
        result: String,
        cascade_cancel_on_failure: bool,
    ) -> Result<Completion, StoreError> {
        if !status.is_terminal() {
            return Err(StoreError::InvalidRequest(format!(
                "cannot complete job {} with non-terminal status {}",
                job_id, status
            )));
        }
        let cascade = cascade_cancel_on_failure && status == JobStatus::Failed;

        let completion = with_connection!(self.dal, |conn| {
            conn.transaction::<_, StoreError, _>(|conn| {
                let now = Utc::now().naive_utc();

                let updated: Option<(i64, i64)> = diesel::update(
                    jobs::table
                        .filter(jobs::id.eq(job_id))
                        .filter(jobs::version.eq(version))
                        .filter(jobs::status.eq_any(JobStatus::NON_TERMINAL)),
                )
                .set((
                    jobs::status.eq(status.as_str()),
                    jobs::result.eq(Some(result)),
                    jobs::version.eq(version + 1),
                    jobs::updated_at.eq(now),
                ))
                .returning((jobs::version, jobs::group_id))
                .get_result(conn)
                .optional()?;

                let Some((new_version, group_id)) = updated else {
                    let exists: Option<i64> = jobs::table
                        .find(job_id)
                        .select(jobs::id)
                        .first(conn)
                        .optional()?;
                    return Err(match exists {
                        Some(_) => StoreError::VersionConflict {
                            job_id,
                            expected: version,
                        },
                        None => StoreError::JobNotFound(job_id),
                    });
                };

                let cascaded = if cascade {
                    diesel::update(
                        jobs::table
                            .filter(jobs::group_id.eq(group_id))
                            .filter(jobs::id.ne(job_id))
                            .filter(jobs::status.eq_any(JobStatus::NON_TERMINAL))
                            .filter(jobs::cancel_requested.eq(false)),
                    )
                    .set((jobs::cancel_requested.eq(true), jobs::updated_at.eq(now)))
                    .execute(conn)?
                } else {
                    0
                };

                Ok(Completion {
                    version: new_version,
                    cascaded,
                })
            })
        });

        debug!(job_id, status = %status, version = completion.version, "Job completed");
        if completion.cascaded > 0 {
            info!(
                job_id,
                cascaded = completion.cascaded,
                "Job failed; requested cancellation of its siblings"
            );
        }
        Ok(completion)
    }

    /// Flags every non-terminal job in the group for cancellation.
    ///
    /// Idempotent: jobs already flagged are left untouched. The flag does not
    /// bump `version`, so a worker finishing concurrently still completes.
    /// Returns the number of jobs newly flagged.
    pub async fn cancel(&self, group_id: i64) -> Result<usize, StoreError> {
        let flagged: usize = with_connection!(self.dal, |conn| {
            let now = Utc::now().naive_utc();
            diesel::update(
                jobs::table
                    .filter(jobs::group_id.eq(group_id))
                    .filter(jobs::status.eq_any(JobStatus::NON_TERMINAL))
                    .filter(jobs::cancel_requested.eq(false)),
            )
            .set((jobs::cancel_requested.eq(true), jobs::updated_at.eq(now)))
            .execute(conn)
        });

        info!(group_id, flagged, "Cancellation requested for group");
        Ok(flagged)
    }
}

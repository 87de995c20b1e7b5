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

//! Retention: removal of finished groups.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use std::collections::BTreeSet;
use tracing::info;

use super::JobDAL;
use crate::database::schema::jobs;
use crate::error::StoreError;
use crate::models::job::JobStatus;

/// What a reap removed, or would remove on a dry run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub groups: Vec<i64>,
    pub jobs_deleted: usize,
    pub dry_run: bool,
}

impl<'a> JobDAL<'a> {
    /// Deletes groups whose jobs are all terminal and untouched since `cutoff`.
    ///
    /// A group with any non-terminal job, or any job updated at or after the
    /// cutoff, is kept whole. With `dry_run` nothing is deleted and
    /// `jobs_deleted` counts the jobs that would go.
    pub async fn reap_finished_groups(
        &self,
        cutoff: DateTime<Utc>,
        dry_run: bool,
    ) -> Result<ReapReport, StoreError> {
        let cutoff = cutoff.naive_utc();

        let (groups, jobs_deleted) = with_connection!(self.dal, |conn| {
            conn.transaction::<_, StoreError, _>(|conn| {
                let candidates: BTreeSet<i64> = jobs::table
                    .filter(jobs::updated_at.lt(cutoff))
                    .select(jobs::group_id)
                    .distinct()
                    .load::<i64>(conn)?
                    .into_iter()
                    .collect();
                if candidates.is_empty() {
                    return Ok((Vec::new(), 0));
                }

                let candidate_ids: Vec<i64> = candidates.iter().copied().collect();
                let active: BTreeSet<i64> = jobs::table
                    .filter(jobs::group_id.eq_any(&candidate_ids))
                    .filter(
                        jobs::status
                            .eq_any(JobStatus::NON_TERMINAL)
                            .or(jobs::updated_at.ge(cutoff)),
                    )
                    .select(jobs::group_id)
                    .distinct()
                    .load::<i64>(conn)?
                    .into_iter()
                    .collect();

                let reapable: Vec<i64> = candidates.difference(&active).copied().collect();
                if reapable.is_empty() {
                    return Ok((reapable, 0));
                }

                let affected = if dry_run {
                    let count: i64 = jobs::table
                        .filter(jobs::group_id.eq_any(&reapable))
                        .count()
                        .get_result(conn)?;
                    count as usize
                } else {
                    diesel::delete(jobs::table.filter(jobs::group_id.eq_any(&reapable)))
                        .execute(conn)?
                };

                Ok((reapable, affected))
            })
        });

        info!(
            groups = groups.len(),
            jobs = jobs_deleted,
            dry_run,
            "Reaped finished groups"
        );
        Ok(ReapReport {
            groups,
            jobs_deleted,
            dry_run,
        })
    }
}

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

//! Pure reduction of a group's jobs into one status.

use std::collections::BTreeMap;

use super::{GroupState, GroupStatus};
use crate::models::job::{Job, JobStatus};
use crate::models::outcome::{Issue, IssueCode, JobResult};

/// Reduces every job of a group into its externally reported status.
///
/// Returns `None` for an empty group. Priority: any failure, then any
/// cancellation, then all-terminal, otherwise in progress. Counters are summed
/// over completed processing jobs whatever the overall state, so partial
/// progress is always visible.
pub fn reduce(group_id: i64, jobs: &[Job]) -> Option<GroupStatus> {
    let created_at = jobs.iter().map(|job| job.created_at).min()?;

    let mut counters: BTreeMap<String, i64> = BTreeMap::new();
    let mut issues = Vec::new();
    let mut any_failed = false;
    let mut any_cancelled = false;
    let mut terminal_count = 0;

    for job in jobs {
        if job.status.is_terminal() {
            terminal_count += 1;
        }

        let result = match job.result.as_deref() {
            None => None,
            Some(raw) => match JobResult::from_json(raw) {
                Ok(result) => Some(result),
                Err(e) => {
                    issues.push(
                        Issue::error(
                            IssueCode::UnreadableResult,
                            format!("Result of job {} could not be read: {}", job.id, e),
                        )
                        .for_job(job.id),
                    );
                    any_failed = true;
                    None
                }
            },
        };

        match job.status {
            JobStatus::Failed => {
                // Failed because it was cancelled while running.
                let was_cancelled = result
                    .as_ref()
                    .is_some_and(|result| result.has_issue(IssueCode::Cancelled));
                if was_cancelled {
                    any_cancelled = true;
                } else {
                    any_failed = true;
                }
            }
            JobStatus::Cancelled => any_cancelled = true,
            JobStatus::Created | JobStatus::Running | JobStatus::Completed => {}
        }

        if let Some(result) = result {
            if job.status == JobStatus::Completed && !job.is_coordinator() {
                for (name, value) in &result.counters {
                    *counters.entry(name.clone()).or_insert(0) += value;
                }
            }
            issues.extend(result.issues.into_iter().map(|issue| issue.for_job(job.id)));
        }
    }

    let state = if any_failed {
        GroupState::Failed
    } else if any_cancelled {
        issues.push(Issue::information(
            IssueCode::Cancelled,
            "The operation was cancelled; counters reflect work finished before cancellation",
        ));
        GroupState::Cancelled
    } else if terminal_count == jobs.len() {
        GroupState::Completed
    } else {
        GroupState::InProgress
    };

    Some(GroupStatus {
        group_id,
        state,
        counters,
        issues,
        job_count: jobs.len(),
        terminal_count,
        created_at,
    })
}

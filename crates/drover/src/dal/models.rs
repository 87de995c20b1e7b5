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

//! Row structs for the `jobs` table, valid on both backends.

use chrono::NaiveDateTime;
use diesel::prelude::*;

use crate::database::schema::jobs;
use crate::error::StoreError;
use crate::models::job::{Job, JobRole, JobStatus, LeaseIdentity, QueueType};

/// A `jobs` row as stored.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = jobs)]
#[diesel(check_for_backend(diesel::pg::Pg, diesel::sqlite::Sqlite))]
pub struct JobRow {
    pub id: i64,
    pub group_id: i64,
    pub queue_type: String,
    pub job_type_id: i32,
    pub definition: String,
    pub result: Option<String>,
    pub status: String,
    pub version: i64,
    pub heartbeat_at: NaiveDateTime,
    pub lease_id: Option<String>,
    pub lease_owner: Option<String>,
    pub cancel_requested: bool,
    pub idempotency_key: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// A row to insert. New jobs always start `Created` at version 1.
#[derive(Debug, Insertable)]
#[diesel(table_name = jobs)]
pub struct NewJobRow {
    pub group_id: i64,
    pub queue_type: String,
    pub job_type_id: i32,
    pub definition: String,
    pub status: String,
    pub version: i64,
    pub heartbeat_at: NaiveDateTime,
    pub cancel_requested: bool,
    pub idempotency_key: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl NewJobRow {
    pub fn created(
        group_id: i64,
        queue_type: QueueType,
        role: JobRole,
        definition: String,
        idempotency_key: Option<String>,
        now: NaiveDateTime,
    ) -> Self {
        Self {
            group_id,
            queue_type: queue_type.as_str().to_string(),
            job_type_id: role.type_id(),
            definition,
            status: JobStatus::Created.as_str().to_string(),
            version: 1,
            heartbeat_at: now,
            cancel_requested: false,
            idempotency_key,
            created_at: now,
            updated_at: now,
        }
    }
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let corrupt = |reason: String| StoreError::Corrupt {
            job_id: row.id,
            reason,
        };

        let queue_type = QueueType::from_str(&row.queue_type)
            .ok_or_else(|| corrupt(format!("unknown queue type '{}'", row.queue_type)))?;
        let status = JobStatus::from_str(&row.status)
            .ok_or_else(|| corrupt(format!("unknown status '{}'", row.status)))?;
        let role = JobRole::try_from(row.job_type_id)
            .map_err(|id| corrupt(format!("unknown job type id {}", id)))?;

        let lease = match (row.lease_id, row.lease_owner) {
            (Some(lease_id), Some(worker_id)) => Some(LeaseIdentity {
                lease_id,
                worker_id,
            }),
            _ => None,
        };

        Ok(Job {
            id: row.id,
            group_id: row.group_id,
            queue_type,
            role,
            definition: row.definition,
            result: row.result,
            status,
            version: row.version,
            heartbeat_at: row.heartbeat_at.and_utc(),
            lease,
            cancel_requested: row.cancel_requested,
            idempotency_key: row.idempotency_key,
            created_at: row.created_at.and_utc(),
            updated_at: row.updated_at.and_utc(),
        })
    }
}

/// Converts loaded rows, failing on the first corrupt one.
pub fn into_jobs(rows: Vec<JobRow>) -> Result<Vec<Job>, StoreError> {
    rows.into_iter().map(Job::try_from).collect()
}

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

//! Job Model
//!
//! A job is the unit of durable work. Every job belongs to exactly one group;
//! a group holds one coordinator and any number of processing children.
//!
//! ```text
//! Created ──lease──▶ Running ──complete──▶ Completed | Failed | Cancelled
//!                      │  ▲
//!                      └──┘ stale heartbeat: re-leased by another worker
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    /// Enqueued and waiting for a lease.
    Created,
    /// Leased by a worker.
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Returns the string stored in the `status` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Created => "Created",
            JobStatus::Running => "Running",
            JobStatus::Completed => "Completed",
            JobStatus::Failed => "Failed",
            JobStatus::Cancelled => "Cancelled",
        }
    }

    /// Parses a status from its stored representation.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "Created" => Some(JobStatus::Created),
            "Running" => Some(JobStatus::Running),
            "Completed" => Some(JobStatus::Completed),
            "Failed" => Some(JobStatus::Failed),
            "Cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Statuses a job can still leave.
    pub const NON_TERMINAL: [&'static str; 2] = ["Created", "Running"];
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of operation a job belongs to. Workers lease from one queue type
/// at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueType {
    Export,
    Import,
    BulkDelete,
    Reindex,
}

impl QueueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueType::Export => "export",
            QueueType::Import => "import",
            QueueType::BulkDelete => "bulk-delete",
            QueueType::Reindex => "reindex",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "export" => Some(QueueType::Export),
            "import" => Some(QueueType::Import),
            "bulk-delete" => Some(QueueType::BulkDelete),
            "reindex" => Some(QueueType::Reindex),
            _ => None,
        }
    }

    pub const ALL: [QueueType; 4] = [
        QueueType::Export,
        QueueType::Import,
        QueueType::BulkDelete,
        QueueType::Reindex,
    ];
}

impl fmt::Display for QueueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of a job within its group, stored as `job_type_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobRole {
    /// The group root; plans and enqueues the processing children.
    Coordinator,
    /// One unit of partitioned work.
    Processing,
}

impl JobRole {
    pub const ALL: [JobRole; 2] = [JobRole::Coordinator, JobRole::Processing];

    pub fn type_id(&self) -> i32 {
        match self {
            JobRole::Coordinator => 1,
            JobRole::Processing => 2,
        }
    }
}

impl TryFrom<i32> for JobRole {
    type Error = i32;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(JobRole::Coordinator),
            2 => Ok(JobRole::Processing),
            other => Err(other),
        }
    }
}

/// The identity of one lease: which worker holds the job, under which token.
///
/// A fresh `lease_id` is minted on every lease acquisition, so a worker whose
/// lease was reclaimed can never renew the new owner's lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseIdentity {
    pub lease_id: String,
    pub worker_id: String,
}

/// A job record (domain type).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique, monotonically increasing identifier.
    pub id: i64,
    /// The group this job belongs to. A coordinator's group id is its own id.
    pub group_id: i64,
    pub queue_type: QueueType,
    pub role: JobRole,
    /// Serialized input payload; immutable once enqueued.
    pub definition: String,
    /// Serialized [`JobResult`](crate::JobResult); present iff the status is terminal.
    pub result: Option<String>,
    pub status: JobStatus,
    /// Optimistic concurrency token, bumped on every lease or status transition.
    pub version: i64,
    /// Last lease renewal.
    pub heartbeat_at: DateTime<Utc>,
    /// Current or most recent lease holder.
    pub lease: Option<LeaseIdentity>,
    /// Sticky cooperative-cancellation flag.
    pub cancel_requested: bool,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn is_coordinator(&self) -> bool {
        self.role == JobRole::Coordinator
    }
}

/// A job to be enqueued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub definition: String,
    /// Unique per group when present; a repeat is rejected as a duplicate.
    pub idempotency_key: Option<String>,
}

impl NewJob {
    pub fn new(definition: impl Into<String>) -> Self {
        Self {
            definition: definition.into(),
            idempotency_key: None,
        }
    }

    pub fn keyed(definition: impl Into<String>, idempotency_key: impl Into<String>) -> Self {
        Self {
            definition: definition.into(),
            idempotency_key: Some(idempotency_key.into()),
        }
    }
}

/// Returned by a successful heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatAck {
    /// The job's version after renewal; `Complete` must carry this value.
    pub version: i64,
    pub cancel_requested: bool,
}

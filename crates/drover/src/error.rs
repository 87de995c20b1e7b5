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

//! Error types for the job store, job bodies and the status read path.
//!
//! Engine-internal races (version conflicts, lost leases, duplicate fan-out)
//! are ordinary variants of [`StoreError`] so callers can match on them and
//! resolve them locally. Only [`StoreError::Unavailable`] is transient.

use diesel::result::DatabaseErrorKind;
use thiserror::Error;

use crate::executor::CancelReason;

/// Errors returned by the job store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A write carried a version older than the stored one.
    #[error("Version conflict on job {job_id}: expected version {expected}")]
    VersionConflict { job_id: i64, expected: i64 },

    /// The lease presented by a worker no longer owns the job.
    #[error("Lease on job {job_id} was lost")]
    LeaseLost { job_id: i64 },

    /// A job with the same idempotency key already exists in the group.
    #[error("Job with idempotency key '{idempotency_key}' is already enqueued in group {group_id}")]
    DuplicateEnqueue {
        group_id: i64,
        idempotency_key: String,
    },

    /// No job with the given id exists.
    #[error("Job {0} not found")]
    JobNotFound(i64),

    /// The request violates a store invariant.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A stored row could not be mapped onto the domain model.
    #[error("Corrupt job record {job_id}: {reason}")]
    Corrupt { job_id: i64, reason: String },

    /// The backend could not be reached or is temporarily refusing work.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A non-transient database error.
    #[error("Database error: {0}")]
    Database(diesel::result::Error),

    /// Embedded migrations failed to apply.
    #[error("Migration failed: {0}")]
    Migration(String),

    /// The connection string or pool settings are unusable.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl StoreError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<diesel::result::Error> for StoreError {
    fn from(error: diesel::result::Error) -> Self {
        use diesel::result::Error as DieselError;

        let transient = match &error {
            DieselError::DatabaseError(kind, info) => {
                matches!(
                    kind,
                    DatabaseErrorKind::ClosedConnection
                        | DatabaseErrorKind::UnableToSendCommand
                        | DatabaseErrorKind::SerializationFailure
                )
                    // SQLite reports lock contention as an unclassified error.
                    || info.message().contains("database is locked")
                    || info.message().contains("database is busy")
            }
            DieselError::BrokenTransactionManager => true,
            _ => false,
        };

        if transient {
            StoreError::Unavailable(error.to_string())
        } else {
            StoreError::Database(error)
        }
    }
}

impl From<deadpool::managed::PoolError<deadpool_diesel::Error>> for StoreError {
    fn from(error: deadpool::managed::PoolError<deadpool_diesel::Error>) -> Self {
        StoreError::Unavailable(format!("connection pool: {}", error))
    }
}

impl From<deadpool_diesel::InteractError> for StoreError {
    fn from(error: deadpool_diesel::InteractError) -> Self {
        StoreError::Unavailable(format!("connection interaction: {}", error))
    }
}

/// Errors a job body returns instead of an outcome.
///
/// Business failures are normally reported as a failed
/// [`JobOutcome`](crate::JobOutcome); this type covers early exits and faults
/// that bodies want to propagate with `?`.
#[derive(Debug, Error)]
pub enum JobError {
    /// The body stopped at a checkpoint because its signal fired.
    #[error("Job cancelled: {0}")]
    Cancelled(CancelReason),

    /// The body failed for a domain reason.
    #[error("{0}")]
    Failed(String),

    /// The job definition could not be decoded.
    #[error("Invalid job definition: {0}")]
    Definition(#[from] serde_json::Error),

    /// A store call made by the body failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from the caller-facing group status query.
#[derive(Debug, Error)]
pub enum StatusError {
    /// The group has no jobs.
    #[error("Group {0} not found")]
    NotFound(i64),

    /// The store could not be read.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Invalid worker configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_concurrent_jobs must be greater than zero")]
    ZeroConcurrency,

    #[error("poll_interval must be greater than zero")]
    ZeroPollInterval,

    #[error("a worker must lease at least one job role")]
    NoRoles,

    #[error("heartbeat_interval ({interval_ms}ms) must be shorter than heartbeat_timeout ({timeout_ms}ms)")]
    HeartbeatNotBelowTimeout { interval_ms: u128, timeout_ms: u128 },
}

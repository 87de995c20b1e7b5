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

//! # Job Engine
//!
//! The surface external callers (an HTTP handler, the CLI) use to start,
//! cancel and observe operations. None of the lease or version machinery is
//! visible from here.

use serde::Serialize;
use tracing::info;

use crate::aggregator::{GroupAggregator, GroupStatus};
use crate::dal::DAL;
use crate::database::Database;
use crate::error::{StatusError, StoreError};
use crate::executor::{JobRegistry, Worker, WorkerConfig};
use crate::models::job::{JobRole, NewJob, QueueType};

/// Entry point for creating, cancelling and querying groups.
#[derive(Debug, Clone)]
pub struct JobEngine {
    dal: DAL,
}

impl JobEngine {
    pub fn new(database: Database) -> Self {
        Self::from_dal(DAL::new(database))
    }

    pub fn from_dal(dal: DAL) -> Self {
        Self { dal }
    }

    pub fn dal(&self) -> &DAL {
        &self.dal
    }

    /// Starts an operation by enqueueing its coordinator job.
    ///
    /// Returns the new group id, which is also the coordinator's job id.
    pub async fn create_group<D>(
        &self,
        queue_type: QueueType,
        definition: &D,
    ) -> Result<i64, StoreError>
    where
        D: Serialize + ?Sized,
    {
        let definition = serde_json::to_string(definition).map_err(|e| {
            StoreError::InvalidRequest(format!("coordinator definition is not serializable: {}", e))
        })?;
        self.create_group_raw(queue_type, definition).await
    }

    /// Like [`create_group`](Self::create_group) with an already serialized definition.
    pub async fn create_group_raw(
        &self,
        queue_type: QueueType,
        definition: String,
    ) -> Result<i64, StoreError> {
        let ids = self
            .dal
            .job()
            .enqueue(
                queue_type,
                None,
                vec![NewJob::new(definition)],
                JobRole::Coordinator,
            )
            .await?;
        let group_id = ids.first().copied().ok_or_else(|| {
            StoreError::InvalidRequest("enqueue returned no job id".to_string())
        })?;

        info!(group_id, queue = %queue_type, "Created group");
        Ok(group_id)
    }

    /// Requests cooperative cancellation of every unfinished job in a group.
    ///
    /// Returns the number of jobs newly flagged; repeating the call is harmless.
    pub async fn cancel_group(&self, group_id: i64) -> Result<usize, StoreError> {
        self.dal.job().cancel(group_id).await
    }

    pub async fn group_status(&self, group_id: i64) -> Result<GroupStatus, StatusError> {
        GroupAggregator::new(self.dal.clone()).status(group_id).await
    }

    /// Builds a worker sharing this engine's connection pool.
    pub fn worker(&self, registry: JobRegistry, config: WorkerConfig) -> Worker {
        Worker::new(self.dal.clone(), registry, config)
    }
}

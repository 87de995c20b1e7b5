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

//! # Group Aggregation
//!
//! The caller-facing status of an operation is never stored. Each query reads
//! every job of the group and reduces them with [`reduce`], so the answer is
//! always consistent with the job records themselves.

mod reduction;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::dal::DAL;
use crate::error::StatusError;
use crate::models::outcome::Issue;

pub use reduction::reduce;

/// The only states a caller ever sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupState {
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl GroupState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupState::InProgress => "InProgress",
            GroupState::Completed => "Completed",
            GroupState::Failed => "Failed",
            GroupState::Cancelled => "Cancelled",
        }
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self, GroupState::InProgress)
    }
}

impl fmt::Display for GroupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregated status of one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupStatus {
    pub group_id: i64,
    pub state: GroupState,
    /// Counters summed over completed processing jobs.
    pub counters: BTreeMap<String, i64>,
    /// Issues from every job result, tagged with their job id.
    pub issues: Vec<Issue>,
    pub job_count: usize,
    pub terminal_count: usize,
    /// When the operation was created.
    pub created_at: DateTime<Utc>,
}

/// Reads a group from the store and reduces it.
#[derive(Debug, Clone)]
pub struct GroupAggregator {
    dal: DAL,
}

impl GroupAggregator {
    pub fn new(dal: DAL) -> Self {
        Self { dal }
    }

    pub async fn status(&self, group_id: i64) -> Result<GroupStatus, StatusError> {
        let jobs = self.dal.job().get_by_group(group_id, true).await?;
        reduce(group_id, &jobs).ok_or(StatusError::NotFound(group_id))
    }
}

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

//! Job outcomes and the result payload persisted on completion.
//!
//! A job body reports business failures as data: a [`JobOutcome`] carrying a
//! terminal status and a [`JobResult`] with counters and issues. The result
//! is stored as JSON in the job's `result` column and read back by the group
//! aggregator.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::job::JobStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueSeverity {
    Information,
    Warning,
    Error,
}

/// Machine-readable classification of an [`Issue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueCode {
    /// The job body failed or panicked.
    Exception,
    /// The job stopped because cancellation was requested.
    Cancelled,
    /// Another worker reclaimed the job's lease.
    LeaseLost,
    /// No body is registered for the job's queue type and role.
    UnknownJobType,
    /// A stored result could not be decoded.
    UnreadableResult,
    /// Free-form notice from a job body.
    Informational,
}

/// One problem or notice attached to a job result or group status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: IssueSeverity,
    pub code: IssueCode,
    pub message: String,
    /// The job that raised the issue; filled in by the aggregator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<i64>,
}

impl Issue {
    pub fn new(severity: IssueSeverity, code: IssueCode, message: impl Into<String>) -> Self {
        Self {
            severity,
            code,
            message: message.into(),
            job_id: None,
        }
    }

    pub fn error(code: IssueCode, message: impl Into<String>) -> Self {
        Self::new(IssueSeverity::Error, code, message)
    }

    pub fn information(code: IssueCode, message: impl Into<String>) -> Self {
        Self::new(IssueSeverity::Information, code, message)
    }

    pub fn for_job(mut self, job_id: i64) -> Self {
        self.job_id = Some(job_id);
        self
    }
}

/// Partial result of one job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    /// Named numeric outputs, summed across a group (e.g. resources per category).
    #[serde(default)]
    pub counters: BTreeMap<String, i64>,
    #[serde(default)]
    pub issues: Vec<Issue>,
    /// Body-specific output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

impl JobResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_counter(mut self, name: impl Into<String>, value: i64) -> Self {
        *self.counters.entry(name.into()).or_insert(0) += value;
        self
    }

    pub fn with_issue(mut self, issue: Issue) -> Self {
        self.issues.push(issue);
        self
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }

    pub fn has_issue(&self, code: IssueCode) -> bool {
        self.issues.iter().any(|issue| issue.code == code)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// What a job body returns: the terminal status to record and its result.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub status: JobStatus,
    pub result: JobResult,
}

impl JobOutcome {
    pub fn completed(result: JobResult) -> Self {
        Self {
            status: JobStatus::Completed,
            result,
        }
    }

    /// A failed outcome carrying `message` as an `exception` issue.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::failed_with(JobResult::new(), IssueCode::Exception, message)
    }

    /// Adds an error issue to an existing partial result and marks it failed.
    pub fn failed_with(result: JobResult, code: IssueCode, message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            result: result.with_issue(Issue::error(code, message)),
        }
    }

    pub fn cancelled(result: JobResult) -> Self {
        Self {
            status: JobStatus::Cancelled,
            result: result.with_issue(Issue::information(
                IssueCode::Cancelled,
                "Job was cancelled before it finished",
            )),
        }
    }
}

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

//! Worker configuration.

use std::time::Duration;
use uuid::Uuid;

use crate::error::ConfigError;
use crate::models::job::{JobRole, QueueType};

/// Configuration for a [`Worker`](super::Worker).
///
/// # Construction
///
/// ```rust,ignore
/// let config = WorkerConfig::builder(QueueType::Export)
///     .max_concurrent_jobs(8)
///     .heartbeat_interval(Duration::from_secs(5))
///     .build()?;
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct WorkerConfig {
    queue_type: QueueType,
    roles: Vec<JobRole>,
    worker_id: String,
    max_concurrent_jobs: usize,
    poll_interval: Duration,
    poll_jitter: Duration,
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
    shutdown_grace: Duration,
    max_poll_backoff: Duration,
    completion_attempts: u32,
}

impl WorkerConfig {
    /// Creates a builder with default values for `queue_type`.
    pub fn builder(queue_type: QueueType) -> WorkerConfigBuilder {
        WorkerConfigBuilder::new(queue_type)
    }

    /// The queue this worker leases from.
    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    /// Job roles this worker leases. Both by default.
    pub fn roles(&self) -> &[JobRole] {
        &self.roles
    }

    /// Identity recorded on every lease this worker takes.
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Ceiling on jobs executing at once in this worker.
    pub fn max_concurrent_jobs(&self) -> usize {
        self.max_concurrent_jobs
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Upper bound of the random delay added to each poll.
    pub fn poll_jitter(&self) -> Duration {
        self.poll_jitter
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    /// Age after which a `Running` job's lease may be reclaimed.
    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_timeout
    }

    /// How long shutdown waits for in-flight jobs before aborting them.
    pub fn shutdown_grace(&self) -> Duration {
        self.shutdown_grace
    }

    pub fn max_poll_backoff(&self) -> Duration {
        self.max_poll_backoff
    }

    /// Attempts at writing a completion while the store is unavailable.
    pub fn completion_attempts(&self) -> u32 {
        self.completion_attempts
    }
}

/// Builder for [`WorkerConfig`].
#[derive(Debug, Clone)]
pub struct WorkerConfigBuilder {
    queue_type: QueueType,
    roles: Vec<JobRole>,
    worker_id: Option<String>,
    max_concurrent_jobs: usize,
    poll_interval: Duration,
    poll_jitter: Duration,
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
    shutdown_grace: Option<Duration>,
    max_poll_backoff: Duration,
    completion_attempts: u32,
}

impl WorkerConfigBuilder {
    fn new(queue_type: QueueType) -> Self {
        Self {
            queue_type,
            roles: JobRole::ALL.to_vec(),
            worker_id: None,
            max_concurrent_jobs: 4,
            poll_interval: Duration::from_secs(1),
            poll_jitter: Duration::from_millis(100),
            heartbeat_interval: Duration::from_secs(10),
            heartbeat_timeout: Duration::from_secs(60),
            shutdown_grace: None,
            max_poll_backoff: Duration::from_secs(30),
            completion_attempts: 3,
        }
    }

    /// Restricts leasing to jobs with one of `roles`, e.g. a worker that only
    /// fans out while processing runs elsewhere.
    pub fn roles(mut self, roles: impl IntoIterator<Item = JobRole>) -> Self {
        self.roles = roles.into_iter().collect();
        self
    }

    /// Sets the worker identity. Defaults to `worker-<uuid>`.
    pub fn worker_id(mut self, value: impl Into<String>) -> Self {
        self.worker_id = Some(value.into());
        self
    }

    pub fn max_concurrent_jobs(mut self, value: usize) -> Self {
        self.max_concurrent_jobs = value;
        self
    }

    pub fn poll_interval(mut self, value: Duration) -> Self {
        self.poll_interval = value;
        self
    }

    pub fn poll_jitter(mut self, value: Duration) -> Self {
        self.poll_jitter = value;
        self
    }

    pub fn heartbeat_interval(mut self, value: Duration) -> Self {
        self.heartbeat_interval = value;
        self
    }

    pub fn heartbeat_timeout(mut self, value: Duration) -> Self {
        self.heartbeat_timeout = value;
        self
    }

    /// Sets the shutdown grace period. Defaults to the heartbeat interval.
    pub fn shutdown_grace(mut self, value: Duration) -> Self {
        self.shutdown_grace = Some(value);
        self
    }

    pub fn max_poll_backoff(mut self, value: Duration) -> Self {
        self.max_poll_backoff = value;
        self
    }

    pub fn completion_attempts(mut self, value: u32) -> Self {
        self.completion_attempts = value;
        self
    }

    /// Validates and builds the configuration.
    pub fn build(self) -> Result<WorkerConfig, ConfigError> {
        if self.max_concurrent_jobs == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ZeroPollInterval);
        }
        if self.roles.is_empty() {
            return Err(ConfigError::NoRoles);
        }
        if self.heartbeat_interval >= self.heartbeat_timeout {
            return Err(ConfigError::HeartbeatNotBelowTimeout {
                interval_ms: self.heartbeat_interval.as_millis(),
                timeout_ms: self.heartbeat_timeout.as_millis(),
            });
        }

        Ok(WorkerConfig {
            queue_type: self.queue_type,
            roles: self.roles,
            worker_id: self
                .worker_id
                .unwrap_or_else(|| format!("worker-{}", Uuid::new_v4())),
            max_concurrent_jobs: self.max_concurrent_jobs,
            poll_interval: self.poll_interval,
            poll_jitter: self.poll_jitter,
            heartbeat_interval: self.heartbeat_interval,
            heartbeat_timeout: self.heartbeat_timeout,
            shutdown_grace: self.shutdown_grace.unwrap_or(self.heartbeat_interval),
            max_poll_backoff: self.max_poll_backoff.max(self.poll_interval),
            completion_attempts: self.completion_attempts.max(1),
        })
    }
}

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

//! # Job Body Registry
//!
//! Resolves a leased job to the code that runs it, keyed by
//! `(queue type, role)`. The engine only manages lease lifecycles; what a job
//! actually does lives behind [`JobBody`].

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::{CancellationSignal, ProgressReporter};
use crate::error::JobError;
use crate::models::job::{Job, JobRole, QueueType};
use crate::models::outcome::JobOutcome;

/// Executable unit for one `(queue type, role)` pair.
///
/// Bodies run at least once per job and must tolerate re-execution after a
/// crash or a lost lease. Business failures are returned as a failed
/// [`JobOutcome`]; `Err` is for early exits (`signal.check()?`) and faults.
///
/// # Example
///
/// ```rust,ignore
/// struct ExportChunk;
///
/// #[async_trait]
/// impl JobBody for ExportChunk {
///     async fn execute(
///         &self,
///         job: &Job,
///         signal: CancellationSignal,
///         progress: ProgressReporter,
///     ) -> Result<JobOutcome, JobError> {
///         let definition: ChildDefinition = serde_json::from_str(&job.definition)?;
///         let mut result = JobResult::new();
///         for page in pages(&definition) {
///             signal.check()?;
///             result = result.with_counter(page.category(), page.len() as i64);
///             progress.report(result.clone());
///         }
///         Ok(JobOutcome::completed(result))
///     }
/// }
/// ```
#[async_trait]
pub trait JobBody: Send + Sync {
    async fn execute(
        &self,
        job: &Job,
        signal: CancellationSignal,
        progress: ProgressReporter,
    ) -> Result<JobOutcome, JobError>;

    /// Whether a `Failed` outcome of this body should ask the rest of its
    /// group to stop. Lease-lost failures never cascade.
    fn cascade_cancel_on_failure(&self) -> bool {
        true
    }
}

type RegistryMap = HashMap<(QueueType, JobRole), Arc<dyn JobBody>>;

/// Maps `(queue type, role)` to job bodies.
///
/// Cheap to clone; clones share registrations.
#[derive(Clone, Default)]
pub struct JobRegistry {
    bodies: Arc<RwLock<RegistryMap>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `body`, replacing any previous registration for the pair.
    pub fn register<B>(&self, queue_type: QueueType, role: JobRole, body: B)
    where
        B: JobBody + 'static,
    {
        self.register_arc(queue_type, role, Arc::new(body));
    }

    pub fn register_arc(&self, queue_type: QueueType, role: JobRole, body: Arc<dyn JobBody>) {
        self.bodies.write().insert((queue_type, role), body);
        tracing::debug!(queue = %queue_type, role = ?role, "Registered job body");
    }

    pub fn resolve(&self, queue_type: QueueType, role: JobRole) -> Option<Arc<dyn JobBody>> {
        self.bodies.read().get(&(queue_type, role)).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.read().is_empty()
    }
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<_> = self.bodies.read().keys().copied().collect();
        f.debug_struct("JobRegistry").field("bodies", &keys).finish()
    }
}

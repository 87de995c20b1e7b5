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

//! Progress reporting from job bodies.
//!
//! A body reports its latest partial result as it goes. If the lease is lost
//! or the body panics, the worker records the last snapshot alongside the
//! failure so partial progress is not thrown away.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::models::outcome::JobResult;

#[derive(Debug, Clone, Default)]
pub struct ProgressReporter {
    latest: Arc<Mutex<Option<JobResult>>>,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the latest snapshot.
    pub fn report(&self, progress: JobResult) {
        *self.latest.lock() = Some(progress);
    }

    /// The latest snapshot, if any was reported.
    pub fn snapshot(&self) -> Option<JobResult> {
        self.latest.lock().clone()
    }
}

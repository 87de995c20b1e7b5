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

//! # Executor
//!
//! Everything that runs on a worker process: the polling loop, per-job
//! execution with heartbeats, cooperative cancellation and the registry that
//! maps leased jobs to their bodies.
//!
//! ```text
//! Worker::run
//!   ├─ ExecutionSlots::try_acquire_up_to   (free capacity)
//!   ├─ JobDAL::dequeue                     (lease that many jobs)
//!   └─ execute_leased per job
//!        ├─ JobBody::execute  ◄─ CancellationSignal, ProgressReporter
//!        ├─ JobDAL::heartbeat (every heartbeat_interval)
//!        └─ JobDAL::complete  (version-checked)
//! ```

mod cancellation;
mod config;
mod execution;
mod progress;
mod registry;
mod slot_token;
mod worker;

pub use cancellation::{CancelReason, CancellationSignal, CancellationSource};
pub use config::{WorkerConfig, WorkerConfigBuilder};
pub use execution::{execute_leased, ExecutionReport};
pub use progress::ProgressReporter;
pub use registry::{JobBody, JobRegistry};
pub use slot_token::{ExecutionSlots, SlotToken};
pub use worker::{Worker, WorkerHandle};

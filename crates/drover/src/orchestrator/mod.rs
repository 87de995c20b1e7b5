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

//! # Fan-out Orchestration
//!
//! A coordinator job describes a partition of work. Its body computes the
//! full set of child work units from that description, subtracts the units
//! already enqueued in its group, and enqueues only what is missing. Because
//! the candidate set is a pure function of the definition, re-running a
//! coordinator after a crash resumes a partial fan-out instead of
//! duplicating it.
//!
//! The coordinator completes as soon as its children are scheduled. Whether
//! the operation as a whole succeeded is answered by the
//! [`aggregator`](crate::aggregator).

mod coordinator;
mod partition;

pub use coordinator::{FanOutCoordinator, FanOutReport};
pub use partition::{ChildDefinition, FanOutDefinition, PartitionRange, WorkUnit};

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

//! Concurrency slots for a worker's bounded execution pool.
//!
//! The worker takes slots before asking the store for leases and asks for
//! exactly as many jobs as it holds slots, so the configured ceiling can
//! never be exceeded.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// A held execution slot. Dropping the token frees the slot.
#[derive(Debug)]
pub struct SlotToken {
    _permit: OwnedSemaphorePermit,
}

/// The fixed-size pool of execution slots owned by one worker.
#[derive(Debug, Clone)]
pub struct ExecutionSlots {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl ExecutionSlots {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Slots currently held by executing jobs.
    pub fn in_use(&self) -> usize {
        self.capacity - self.available()
    }

    /// Takes up to `max` free slots without waiting.
    pub fn try_acquire_up_to(&self, max: usize) -> Vec<SlotToken> {
        let mut tokens = Vec::new();
        while tokens.len() < max {
            match self.semaphore.clone().try_acquire_owned() {
                Ok(permit) => tokens.push(SlotToken { _permit: permit }),
                Err(_) => break,
            }
        }
        tokens
    }
}

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

//! Cooperative cancellation handed to job bodies.
//!
//! The worker owns a [`CancellationSource`] per execution and fires it when a
//! heartbeat reports `cancel_requested`. Job bodies hold the matching
//! [`CancellationSignal`] and check it at safe checkpoints. Tests can build a
//! source directly and fire it whenever they like.

use std::fmt;
use tokio::sync::watch;

use crate::error::JobError;

/// Why a job was asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// Cancellation was requested for the job's group.
    Requested,
    /// The lease was reclaimed by another worker.
    LeaseLost,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Requested => f.write_str("cancellation requested"),
            CancelReason::LeaseLost => f.write_str("lease lost"),
        }
    }
}

/// The firing side of a cancellation signal.
#[derive(Debug)]
pub struct CancellationSource {
    tx: watch::Sender<Option<CancelReason>>,
}

impl CancellationSource {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    pub fn signal(&self) -> CancellationSignal {
        CancellationSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Fires the signal. The first reason sticks; later calls are ignored.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        })
    }

    pub fn is_cancelled(&self) -> bool {
        self.tx.borrow().is_some()
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

/// The observing side, passed into [`JobBody::execute`](super::JobBody::execute).
#[derive(Debug, Clone)]
pub struct CancellationSignal {
    rx: watch::Receiver<Option<CancelReason>>,
}

impl CancellationSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        CancellationSource::new().signal()
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.borrow().is_some()
    }

    pub fn reason(&self) -> Option<CancelReason> {
        *self.rx.borrow()
    }

    /// Checkpoint helper: `signal.check()?` exits a body once cancelled.
    pub fn check(&self) -> Result<(), JobError> {
        match self.reason() {
            Some(reason) => Err(JobError::Cancelled(reason)),
            None => Ok(()),
        }
    }

    /// Resolves once the signal fires. Pends forever if it never can.
    pub async fn cancelled(&self) -> CancelReason {
        let mut rx = self.rx.clone();
        let fired = rx
            .wait_for(|reason| reason.is_some())
            .await
            .ok()
            .and_then(|reason| *reason);
        match fired {
            Some(reason) => reason,
            // The source was dropped without firing.
            None => futures::future::pending().await,
        }
    }
}

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

//! `drover worker`: runs fan-out coordinators for one queue.
//!
//! Processing bodies are application code, so this worker only leases
//! coordinator jobs and leaves the children to workers that know how to
//! run them.

use anyhow::{Context, Result};
use drover::orchestrator::FanOutCoordinator;
use drover::{JobEngine, JobRegistry, JobRole, QueueType};
use tracing::{info, warn};

use crate::config::WorkerSettings;

pub async fn run(engine: &JobEngine, settings: &WorkerSettings, queue_type: QueueType) -> Result<()> {
    let config = settings
        .to_worker_config(queue_type, &[JobRole::Coordinator])
        .context("Invalid worker configuration")?;

    let registry = JobRegistry::new();
    registry.register(
        queue_type,
        JobRole::Coordinator,
        FanOutCoordinator::new(engine.dal().clone()),
    );

    let worker_id = config.worker_id().to_string();
    let handle = engine.worker(registry, config).spawn();
    info!(worker_id = %worker_id, queue = %queue_type, "Worker started; press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down worker");

    if let Err(e) = handle.shutdown().await {
        warn!(error = %e, "Worker task ended abnormally");
    }
    Ok(())
}

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

//! `create`, `status` and `cancel`.

use anyhow::{Context, Result};
use drover::orchestrator::FanOutDefinition;
use drover::{JobEngine, QueueType, StatusError};

/// Parses a coordinator definition given on the command line.
///
/// The `drover worker` coordinator only understands fan-out definitions, so
/// anything else is rejected before a group exists.
pub fn parse_definition(raw: &str) -> Result<FanOutDefinition> {
    serde_json::from_str(raw).with_context(|| format!("Invalid fan-out definition: {}", raw))
}

pub async fn create(engine: &JobEngine, queue_type: QueueType, definition: &str) -> Result<()> {
    let definition = parse_definition(definition)?;
    let group_id = engine
        .create_group(queue_type, &definition)
        .await
        .context("Failed to create group")?;
    println!("{}", group_id);
    Ok(())
}

pub async fn status(engine: &JobEngine, group_id: i64) -> Result<()> {
    let status = match engine.group_status(group_id).await {
        Ok(status) => status,
        Err(StatusError::NotFound(_)) => anyhow::bail!("Group {} does not exist", group_id),
        Err(e) => return Err(e).context("Failed to read group status"),
    };
    let rendered =
        serde_json::to_string_pretty(&status).context("Failed to render group status")?;
    println!("{}", rendered);
    Ok(())
}

pub async fn cancel(engine: &JobEngine, group_id: i64) -> Result<()> {
    let flagged = engine
        .cancel_group(group_id)
        .await
        .context("Failed to cancel group")?;
    if flagged == 0 {
        println!("Group {}: no unfinished jobs left to cancel", group_id);
    } else {
        println!("Group {}: cancellation requested for {} job(s)", group_id, flagged);
    }
    Ok(())
}

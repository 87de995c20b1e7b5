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

//! Subcommand implementations.

pub mod group;
pub mod migrate;
pub mod reap;
pub mod worker;

use anyhow::{Context, Result};
use drover::{Database, JobEngine};

use crate::config::DatabaseConfig;

/// Opens a pool against `url` and wraps it in an engine.
pub fn connect(url: &str, database: &DatabaseConfig) -> Result<JobEngine> {
    let database =
        Database::new(url, database.pool_size).context("Failed to connect to database")?;
    Ok(JobEngine::new(database))
}

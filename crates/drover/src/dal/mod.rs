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

//! Data Access Layer with runtime backend selection
//!
//! Every operation dispatches to PostgreSQL or SQLite based on the backend
//! detected from the connection URL. Queries that read the same on both
//! backends are written once and expanded per backend by `with_connection!`;
//! the lease query, which needs row locks on PostgreSQL and an IMMEDIATE
//! transaction on SQLite, has one implementation per backend.
//!
//! # Example
//!
//! ```rust,ignore
//! use drover::dal::DAL;
//! use drover::database::Database;
//!
//! let dal = DAL::new(Database::new("postgres://localhost/drover", 10)?);
//! let jobs = dal.job().get_by_group(group_id, true).await?;
//! ```

use crate::database::{BackendType, Database};

/// Evaluates the first expression on PostgreSQL, the second on SQLite.
macro_rules! dispatch_backend {
    ($backend:expr, $pg:expr, $sqlite:expr) => {
        match $backend {
            $crate::database::BackendType::Postgres => $pg,
            $crate::database::BackendType::Sqlite => $sqlite,
        }
    };
}

/// Runs `$body` on a pooled connection of whichever backend `$dal` uses.
///
/// The body is compiled once per backend, so it must only use query DSL both
/// support. It runs on a blocking thread and must evaluate to a `Result`
/// whose error converts into [`StoreError`](crate::StoreError).
macro_rules! with_connection {
    ($dal:expr, |$conn:ident| $body:expr) => {
        dispatch_backend!(
            $dal.backend(),
            {
                let pooled = $dal.database.get_postgres_connection().await?;
                pooled.interact(move |$conn| $body).await??
            },
            {
                let pooled = $dal.database.get_sqlite_connection().await?;
                pooled.interact(move |$conn| $body).await??
            }
        )
    };
}

pub mod job;
pub mod models;

pub use job::{Completion, JobDAL, ReapReport};

/// The Data Access Layer.
///
/// `DAL` is `Clone`; every clone shares the same connection pool.
#[derive(Clone, Debug)]
pub struct DAL {
    pub database: Database,
}

impl DAL {
    pub fn new(database: Database) -> Self {
        DAL { database }
    }

    /// Returns the backend type for this DAL instance.
    pub fn backend(&self) -> BackendType {
        self.database.backend()
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Returns the job store.
    pub fn job(&self) -> JobDAL<'_> {
        JobDAL::new(self)
    }
}

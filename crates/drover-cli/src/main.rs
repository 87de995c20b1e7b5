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

//! Drover CLI - operator tool for the Drover job engine.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use drover::QueueType;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod config;

use config::ConfigLoader;

/// Drover - durable job queue and fan-out engine
#[derive(Parser, Debug)]
#[command(name = "drover")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to DROVER_CONFIG, ./drover.toml, then the user and system config dirs)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database URL (can also be set via DATABASE_URL environment variable)
    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create or upgrade the jobs schema
    Migrate,

    /// Start an operation and print its group id
    Create {
        /// Queue type: export, import, bulk-delete or reindex
        #[arg(long, value_parser = parse_queue)]
        queue: QueueType,

        /// Fan-out definition as JSON, e.g. '{"categories":["Patient"],"partitions":4,"parallel":true}'
        #[arg(long)]
        definition: String,
    },

    /// Print the aggregated status of a group as JSON
    Status {
        group_id: i64,
    },

    /// Request cancellation of every unfinished job in a group
    Cancel {
        group_id: i64,
    },

    /// Run a worker executing the fan-out coordinators of one queue until Ctrl-C
    Worker {
        #[arg(long, value_parser = parse_queue)]
        queue: QueueType,

        /// Overrides worker.max_concurrent_jobs from the configuration file
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Administrative commands
    Admin {
        #[command(subcommand)]
        command: AdminCommands,
    },
}

#[derive(Subcommand, Debug)]
enum AdminCommands {
    /// Delete groups whose jobs all finished before the cutoff
    Reap {
        /// Delete groups untouched for this long (e.g. "30d", "7d", "24h")
        #[arg(long, default_value = "30d")]
        older_than: String,

        /// Report what would be deleted without deleting it
        #[arg(long)]
        dry_run: bool,
    },
}

fn parse_queue(s: &str) -> Result<QueueType, String> {
    QueueType::from_str(s).ok_or_else(|| {
        let known: Vec<&str> = QueueType::ALL.iter().map(QueueType::as_str).collect();
        format!("unknown queue '{}', expected one of: {}", s, known.join(", "))
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let mut config = ConfigLoader::new()
        .load_config(cli.config.as_deref())
        .context("Failed to load configuration")?;

    let database_url = cli
        .database_url
        .clone()
        .or_else(|| config.database.url.clone())
        .ok_or_else(|| {
            anyhow!("Database URL is required. Set --database-url, DATABASE_URL or [database] url in drover.toml")
        })?;
    let engine = commands::connect(&database_url, &config.database)?;

    match cli.command {
        Commands::Migrate => commands::migrate::run(&engine).await?,
        Commands::Create { queue, definition } => {
            commands::group::create(&engine, queue, &definition).await?
        }
        Commands::Status { group_id } => commands::group::status(&engine, group_id).await?,
        Commands::Cancel { group_id } => commands::group::cancel(&engine, group_id).await?,
        Commands::Worker { queue, concurrency } => {
            if let Some(concurrency) = concurrency {
                config.worker.max_concurrent_jobs = concurrency;
            }
            commands::worker::run(&engine, &config.worker, queue).await?
        }
        Commands::Admin { command } => match command {
            AdminCommands::Reap {
                older_than,
                dry_run,
            } => commands::reap::run(&engine, &older_than, dry_run).await?,
        },
    }

    Ok(())
}

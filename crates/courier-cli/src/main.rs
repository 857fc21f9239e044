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

//! Courier CLI - administration for the courier delivery engine.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

/// Courier - federated delivery and background-task engine
#[derive(Parser)]
#[command(name = "courier")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database URL (can also be set via DATABASE_URL environment variable)
    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    /// Configuration file (defaults to COURIER_CONFIG or the search path)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,

    /// Administrative commands for the task queue and endpoint registry
    Admin {
        #[command(subcommand)]
        command: AdminCommands,
    },
}

#[derive(Subcommand)]
enum AdminCommands {
    /// Show queue counts and endpoint health
    Status {
        /// Also list archived endpoints
        #[arg(long)]
        archived: bool,
    },

    /// Delete finished tasks from the queue
    CleanupTasks {
        /// Delete tasks finished longer ago than this (e.g. "1h", "7d", "1d12h")
        #[arg(long, default_value = "1h")]
        older_than: String,

        /// Preview what would be deleted without actually deleting
        #[arg(long)]
        dry_run: bool,
    },

    /// Exclude an endpoint or server from future fan-out
    ArchiveEndpoint {
        /// Inbox or server URL
        url: String,
    },

    /// Lift archival and contact an endpoint again on the next delivery
    ReprobeEndpoint {
        /// Inbox or server URL
        url: String,
    },

    /// Archive endpoints whose failure streak crossed the threshold
    SweepHealth,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
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

    let settings = commands::Settings::load(cli.database_url, cli.config.as_deref())?;

    match cli.command {
        Commands::Migrate => commands::migrate::run(&settings).await?,
        Commands::Admin { command } => match command {
            AdminCommands::Status { archived } => {
                commands::status::run(&settings, archived).await?;
            }
            AdminCommands::CleanupTasks {
                older_than,
                dry_run,
            } => {
                commands::cleanup_tasks::run(&settings, &older_than, dry_run)
                    .await
                    .context("cleanup-tasks failed")?;
            }
            AdminCommands::ArchiveEndpoint { url } => {
                commands::endpoints::archive(&settings, &url).await?;
            }
            AdminCommands::ReprobeEndpoint { url } => {
                commands::endpoints::reprobe(&settings, &url).await?;
            }
            AdminCommands::SweepHealth => commands::endpoints::sweep(&settings).await?,
        },
    }

    Ok(())
}

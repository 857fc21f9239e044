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

//! `courier admin status`: queue counts and endpoint health.

use anyhow::{Context, Result};
use chrono::Utc;

use super::Settings;

pub async fn run(settings: &Settings, list_archived: bool) -> Result<()> {
    let registry = settings.registry()?;
    let summary = registry
        .summary()
        .await
        .context("Failed to read registry summary")?;

    println!("Tasks");
    println!("  pending   {:>8}", summary.tasks.pending);
    println!("  deferred  {:>8}", summary.tasks.deferred);
    println!("  claimed   {:>8}", summary.tasks.claimed);
    println!("  done      {:>8}", summary.tasks.done);
    println!("  failed    {:>8}", summary.tasks.failed);
    for (priority, count) in &summary.tasks.waiting_by_priority {
        println!("    priority {}: {}", priority, count);
    }
    println!("Endpoints");
    println!("  healthy   {:>8}", summary.healthy);
    println!("  degraded  {:>8}", summary.degraded);
    println!("  archived  {:>8}", summary.archived);
    println!("Archived servers {:>8}", summary.archived_servers);

    if list_archived {
        let now = Utc::now();
        let archived = registry
            .list_archived()
            .await
            .context("Failed to list archived endpoints")?;
        println!();
        for status in archived {
            let since = status
                .failing_since
                .map(|t| format!("failing for {} days", (now - t).num_days()))
                .unwrap_or_else(|| "archived by operator".to_string());
            println!("  {}  ({})", status.url, since);
        }
    }
    Ok(())
}

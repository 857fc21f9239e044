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

//! `courier admin cleanup-tasks`: delete finished tasks past a retention
//! window.

use anyhow::{Context, Result};
use tracing::info;

use super::{parse_duration, Settings};

pub async fn run(settings: &Settings, older_than: &str, dry_run: bool) -> Result<()> {
    let retention = parse_duration(older_than)
        .with_context(|| format!("Invalid duration: '{}'", older_than))?;
    let queue_dal = settings.dal()?;
    let queue = queue_dal.task_queue();

    if dry_run {
        let count = queue
            .count_done_older_than(retention)
            .await
            .context("Failed to count tasks")?;
        if count == 0 {
            info!("No finished tasks older than {}", older_than);
        } else {
            info!("[DRY RUN] Would delete {} finished task(s) older than {}", count, older_than);
        }
    } else {
        let deleted = queue
            .purge_done(retention)
            .await
            .context("Failed to delete tasks")?;
        if deleted == 0 {
            info!("No finished tasks older than {}", older_than);
        } else {
            info!("Deleted {} finished task(s) older than {}", deleted, older_than);
        }
    }
    Ok(())
}

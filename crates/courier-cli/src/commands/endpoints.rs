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

//! Manual endpoint overrides.

use anyhow::{bail, Context, Result};
use tracing::info;

use super::Settings;

pub async fn archive(settings: &Settings, url: &str) -> Result<()> {
    let found = settings
        .registry()?
        .force_archive(url)
        .await
        .with_context(|| format!("Failed to archive {}", url))?;
    if !found {
        bail!("No endpoint or server known for {}", url);
    }
    info!("Archived {}", url);
    Ok(())
}

pub async fn reprobe(settings: &Settings, url: &str) -> Result<()> {
    let found = settings
        .registry()?
        .force_reprobe(url)
        .await
        .with_context(|| format!("Failed to reprobe {}", url))?;
    if !found {
        bail!("No endpoint or server known for {}", url);
    }
    info!("{} will be contacted on its next delivery", url);
    Ok(())
}

pub async fn sweep(settings: &Settings) -> Result<()> {
    let archived = settings
        .registry()?
        .health_sweep()
        .await
        .context("Health sweep failed")?;
    if archived.is_empty() {
        info!("No endpoints crossed the archival threshold");
    }
    for url in archived {
        info!("Archived {}", url);
    }
    Ok(())
}

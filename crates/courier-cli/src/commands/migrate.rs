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

//! `courier migrate`: apply embedded migrations.

use anyhow::{Context, Result};
use tracing::info;

use super::Settings;

pub async fn run(settings: &Settings) -> Result<()> {
    let dal = settings.dal()?;
    dal.database()
        .run_migrations()
        .await
        .context("Failed to run migrations")?;
    info!(backend = ?dal.backend(), "Database is up to date");
    Ok(())
}

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

//! Subcommand implementations and the settings they share.

pub mod cleanup_tasks;
pub mod endpoints;
pub mod migrate;
pub mod status;

use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use courier::config::ConfigLoader;
use courier::{CourierConfig, Database, EndpointRegistry, DAL};

/// Database URL and configuration resolved from flags, environment and
/// the configuration file.
pub struct Settings {
    pub database_url: String,
    pub config: CourierConfig,
}

impl Settings {
    /// The `--database-url` flag (or `DATABASE_URL`) wins over the file.
    pub fn load(database_url: Option<String>, config_file: Option<&Path>) -> Result<Self> {
        let file = ConfigLoader::new()
            .load_or_default(config_file)
            .context("Failed to load configuration")?;
        let database_url = database_url.or_else(|| file.database.url.clone()).context(
            "Database URL is required. Set --database-url, DATABASE_URL, or [database] url",
        )?;
        let config = file.into_config().context("Invalid configuration")?;
        Ok(Self {
            database_url,
            config,
        })
    }

    pub fn dal(&self) -> Result<DAL> {
        let database = Database::try_new(&self.database_url, self.config.db_pool_size())
            .context("Failed to connect to database")?;
        Ok(DAL::new(database))
    }

    pub fn registry(&self) -> Result<EndpointRegistry> {
        Ok(EndpointRegistry::new(
            self.dal()?,
            self.config.health_policy(),
            self.config.retry_policy(),
        ))
    }
}

/// Parses durations such as "90d", "24h" or "1d2h30m45s".
///
/// Units are `d`, `h`, `m` and `s`; every number needs one, and the total
/// must be positive.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let input = input.trim().to_lowercase();
    if input.is_empty() {
        bail!("Duration string cannot be empty");
    }

    let mut total_secs: u64 = 0;
    let mut digits = String::new();
    for c in input.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        if digits.is_empty() {
            bail!("Invalid duration format: expected number before '{}'", c);
        }
        let value: u64 = digits
            .parse()
            .with_context(|| format!("Invalid number in duration: {}", digits))?;
        digits.clear();

        let unit = match c {
            'd' => 86_400,
            'h' => 3_600,
            'm' => 60,
            's' => 1,
            _ => bail!("Unknown duration unit: '{}'. Use d, h, m, or s", c),
        };
        total_secs = value
            .checked_mul(unit)
            .and_then(|secs| total_secs.checked_add(secs))
            .ok_or_else(|| anyhow!("Duration '{}' is too large", input))?;
    }

    if !digits.is_empty() {
        bail!(
            "Duration '{}' is missing a unit. Use d (days), h (hours), m (minutes), or s (seconds)",
            input
        );
    }
    if total_secs == 0 {
        bail!("Duration must be greater than zero");
    }
    Ok(Duration::from_secs(total_secs))
}

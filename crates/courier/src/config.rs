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

//! Runtime configuration.
//!
//! [`CourierConfig`] is built in code through [`CourierConfig::builder`],
//! or read from a TOML file by [`ConfigLoader`]. Files may reference the
//! environment with `${VAR}`, `${VAR:-default}` and `${VAR:?message}`.
//!
//! ```toml
//! [database]
//! url = "${DATABASE_URL:-sqlite:///var/lib/courier/queue.db}"
//!
//! [scheduler]
//! max_workers = 20
//! max_load = 12.0
//!
//! [delivery]
//! archival_days = 32
//! relay_deny_tags = ["nsfw"]
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::health::HealthPolicy;
use crate::retry::RetryPolicy;

/// Configuration of the scheduler, dispatcher and registry.
///
/// ```rust,ignore
/// let config = CourierConfig::builder()
///     .max_workers(4)
///     .archival_days(14)
///     .build()?;
/// ```
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct CourierConfig {
    db_pool_size: u32,
    max_workers: usize,
    max_load: f64,
    load_exponent: i32,
    max_connections_level: u32,
    fastlane: bool,
    poll_interval: Duration,
    task_timeout: Duration,
    claim_timeout: Duration,
    worker_cooldown: Duration,
    maintenance_interval: Duration,
    retention: Duration,
    max_attempts: i32,
    archival_days: i64,
    ignore_archived: bool,
    relay_deny_tags: Vec<String>,
}

impl Default for CourierConfig {
    fn default() -> Self {
        Self {
            db_pool_size: 10,
            max_workers: 10,
            max_load: 20.0,
            load_exponent: 3,
            max_connections_level: 75,
            fastlane: true,
            poll_interval: Duration::from_secs(10),
            task_timeout: Duration::from_secs(300),
            claim_timeout: Duration::from_secs(600),
            worker_cooldown: Duration::ZERO,
            maintenance_interval: Duration::from_secs(300),
            retention: Duration::from_secs(3600),
            max_attempts: 15,
            archival_days: 32,
            ignore_archived: false,
            relay_deny_tags: Vec::new(),
        }
    }
}

impl CourierConfig {
    pub fn builder() -> CourierConfigBuilder {
        CourierConfigBuilder::default()
    }

    /// Connections in the database pool. SQLite always uses one.
    pub fn db_pool_size(&self) -> u32 {
        self.db_pool_size
    }

    /// Upper bound on concurrently executing tasks.
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Load average at which claiming stops entirely.
    pub fn max_load(&self) -> f64 {
        self.max_load
    }

    /// How steeply the worker limit falls as load rises.
    pub fn load_exponent(&self) -> i32 {
        self.load_exponent
    }

    /// Pool usage percentage at which claiming pauses.
    pub fn max_connections_level(&self) -> u32 {
        self.max_connections_level
    }

    pub fn fastlane(&self) -> bool {
        self.fastlane
    }

    /// Longest idle wait between claim attempts.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Limit on a single execution; exceeding it counts as a transient failure.
    pub fn task_timeout(&self) -> Duration {
        self.task_timeout
    }

    /// Age after which a claim is considered abandoned.
    pub fn claim_timeout(&self) -> Duration {
        self.claim_timeout
    }

    /// Pause a worker slot takes after each task.
    pub fn worker_cooldown(&self) -> Duration {
        self.worker_cooldown
    }

    /// How often stale claims, silent endpoints and old tasks are cleaned up.
    pub fn maintenance_interval(&self) -> Duration {
        self.maintenance_interval
    }

    /// How long finished tasks are kept.
    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub fn max_attempts(&self) -> i32 {
        self.max_attempts
    }

    pub fn archival_days(&self) -> i64 {
        self.archival_days
    }

    /// Deliver to archived endpoints as well.
    pub fn ignore_archived(&self) -> bool {
        self.ignore_archived
    }

    /// Content carrying any of these tags is never relayed.
    pub fn relay_deny_tags(&self) -> &[String] {
        &self.relay_deny_tags
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts)
    }

    pub fn health_policy(&self) -> HealthPolicy {
        HealthPolicy::new(self.archival_days)
    }
}

/// Builder for [`CourierConfig`]. Unset values keep their defaults.
#[derive(Debug, Clone, Default)]
pub struct CourierConfigBuilder {
    config: CourierConfig,
}

impl CourierConfigBuilder {
    pub fn db_pool_size(mut self, size: u32) -> Self {
        self.config.db_pool_size = size;
        self
    }

    pub fn max_workers(mut self, workers: usize) -> Self {
        self.config.max_workers = workers;
        self
    }

    pub fn max_load(mut self, load: f64) -> Self {
        self.config.max_load = load;
        self
    }

    pub fn load_exponent(mut self, exponent: i32) -> Self {
        self.config.load_exponent = exponent;
        self
    }

    pub fn max_connections_level(mut self, percent: u32) -> Self {
        self.config.max_connections_level = percent;
        self
    }

    pub fn fastlane(mut self, enabled: bool) -> Self {
        self.config.fastlane = enabled;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn task_timeout(mut self, timeout: Duration) -> Self {
        self.config.task_timeout = timeout;
        self
    }

    pub fn claim_timeout(mut self, timeout: Duration) -> Self {
        self.config.claim_timeout = timeout;
        self
    }

    pub fn worker_cooldown(mut self, cooldown: Duration) -> Self {
        self.config.worker_cooldown = cooldown;
        self
    }

    pub fn maintenance_interval(mut self, interval: Duration) -> Self {
        self.config.maintenance_interval = interval;
        self
    }

    pub fn retention(mut self, retention: Duration) -> Self {
        self.config.retention = retention;
        self
    }

    pub fn max_attempts(mut self, attempts: i32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    pub fn archival_days(mut self, days: i64) -> Self {
        self.config.archival_days = days;
        self
    }

    pub fn ignore_archived(mut self, ignore: bool) -> Self {
        self.config.ignore_archived = ignore;
        self
    }

    pub fn relay_deny_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.relay_deny_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Validates and returns the configuration.
    pub fn build(self) -> Result<CourierConfig, ConfigError> {
        let config = self.config;
        if config.max_workers == 0 {
            return Err(invalid("max_workers", "must be at least 1"));
        }
        if config.max_load.is_nan() || config.max_load <= 0.0 {
            return Err(invalid("max_load", "must be positive"));
        }
        if config.load_exponent < 1 {
            return Err(invalid("load_exponent", "must be at least 1"));
        }
        if config.max_connections_level == 0 || config.max_connections_level > 100 {
            return Err(invalid("max_connections_level", "must be a percentage in 1..=100"));
        }
        if config.db_pool_size == 0 {
            return Err(invalid("db_pool_size", "must be at least 1"));
        }
        if config.max_attempts < 0 {
            return Err(invalid("max_attempts", "must not be negative"));
        }
        if config.archival_days < 1 {
            return Err(invalid("archival_days", "must be at least 1"));
        }
        if config.poll_interval.is_zero() {
            return Err(invalid("poll_interval", "must not be zero"));
        }
        if config.task_timeout.is_zero() {
            return Err(invalid("task_timeout", "must not be zero"));
        }
        if config.claim_timeout <= config.task_timeout {
            return Err(invalid(
                "claim_timeout",
                "must exceed task_timeout, or running tasks would be reclaimed",
            ));
        }
        Ok(config)
    }
}

fn invalid(field: &'static str, message: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        message: message.to_string(),
    }
}

/// On-disk configuration layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub database: DatabaseSection,
    pub scheduler: SchedulerSection,
    pub delivery: DeliverySection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseSection {
    pub url: Option<String>,
    pub pool_size: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerSection {
    pub max_workers: Option<usize>,
    pub max_load: Option<f64>,
    pub load_exponent: Option<i32>,
    pub max_connections_level: Option<u32>,
    pub fastlane: Option<bool>,
    pub poll_interval_secs: Option<u64>,
    pub task_timeout_secs: Option<u64>,
    pub claim_timeout_secs: Option<u64>,
    pub worker_cooldown_ms: Option<u64>,
    pub maintenance_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeliverySection {
    pub max_attempts: Option<i32>,
    pub archival_days: Option<i64>,
    pub ignore_archived: Option<bool>,
    pub relay_deny_tags: Option<Vec<String>>,
    pub retention_secs: Option<u64>,
}

impl ConfigFile {
    /// Builds a validated configuration, defaults filling unset values.
    pub fn into_config(self) -> Result<CourierConfig, ConfigError> {
        let mut builder = CourierConfig::builder();
        let ConfigFile {
            database,
            scheduler,
            delivery,
        } = self;

        if let Some(v) = database.pool_size {
            builder = builder.db_pool_size(v);
        }
        if let Some(v) = scheduler.max_workers {
            builder = builder.max_workers(v);
        }
        if let Some(v) = scheduler.max_load {
            builder = builder.max_load(v);
        }
        if let Some(v) = scheduler.load_exponent {
            builder = builder.load_exponent(v);
        }
        if let Some(v) = scheduler.max_connections_level {
            builder = builder.max_connections_level(v);
        }
        if let Some(v) = scheduler.fastlane {
            builder = builder.fastlane(v);
        }
        if let Some(v) = scheduler.poll_interval_secs {
            builder = builder.poll_interval(Duration::from_secs(v));
        }
        if let Some(v) = scheduler.task_timeout_secs {
            builder = builder.task_timeout(Duration::from_secs(v));
        }
        if let Some(v) = scheduler.claim_timeout_secs {
            builder = builder.claim_timeout(Duration::from_secs(v));
        }
        if let Some(v) = scheduler.worker_cooldown_ms {
            builder = builder.worker_cooldown(Duration::from_millis(v));
        }
        if let Some(v) = scheduler.maintenance_interval_secs {
            builder = builder.maintenance_interval(Duration::from_secs(v));
        }
        if let Some(v) = delivery.max_attempts {
            builder = builder.max_attempts(v);
        }
        if let Some(v) = delivery.archival_days {
            builder = builder.archival_days(v);
        }
        if let Some(v) = delivery.ignore_archived {
            builder = builder.ignore_archived(v);
        }
        if let Some(v) = delivery.relay_deny_tags {
            builder = builder.relay_deny_tags(v);
        }
        if let Some(v) = delivery.retention_secs {
            builder = builder.retention(Duration::from_secs(v));
        }
        builder.build()
    }
}

/// Finds and reads configuration files.
pub struct ConfigLoader {
    search_paths: Vec<PathBuf>,
}

impl ConfigLoader {
    /// Environment variable naming an explicit configuration file.
    pub const CONFIG_ENV: &'static str = "COURIER_CONFIG";

    /// Searches `./courier.toml`, the user config directory, then
    /// `/etc/courier/config.toml`.
    pub fn new() -> Self {
        let mut search_paths = vec![PathBuf::from("./courier.toml")];
        if let Some(config_dir) = dirs::config_dir() {
            search_paths.push(config_dir.join("courier").join("config.toml"));
        }
        search_paths.push(PathBuf::from("/etc/courier/config.toml"));
        Self { search_paths }
    }

    pub fn with_search_paths(search_paths: Vec<PathBuf>) -> Self {
        Self { search_paths }
    }

    /// Loads `config_file`, the file named by `COURIER_CONFIG`, or the first
    /// file found on the search path, in that order.
    pub fn load(&self, config_file: Option<&Path>) -> Result<ConfigFile, ConfigError> {
        let path = if let Some(path) = config_file {
            path.to_path_buf()
        } else if let Ok(from_env) = env::var(Self::CONFIG_ENV) {
            PathBuf::from(from_env)
        } else {
            self.find_config_file().ok_or(ConfigError::ConfigNotFound)?
        };
        self.load_from_file(&path)
    }

    /// Like [`load`](Self::load), but an absent file yields the defaults.
    pub fn load_or_default(&self, config_file: Option<&Path>) -> Result<ConfigFile, ConfigError> {
        match self.load(config_file) {
            Err(ConfigError::ConfigNotFound) => Ok(ConfigFile::default()),
            other => other,
        }
    }

    pub fn load_from_file(&self, path: &Path) -> Result<ConfigFile, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") | None => self.parse(&content),
            Some(ext) => Err(ConfigError::UnsupportedFormat {
                extension: ext.to_string(),
            }),
        }
    }

    /// Parses TOML text after environment substitution.
    pub fn parse(&self, content: &str) -> Result<ConfigFile, ConfigError> {
        let substituted = substitute_env_vars(content)?;
        Ok(toml::from_str::<ConfigFile>(&substituted)?)
    }

    pub fn find_config_file(&self) -> Option<PathBuf> {
        self.search_paths
            .iter()
            .find(|path| path.is_file())
            .cloned()
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn env_pattern() -> Result<&'static Regex, ConfigError> {
    static PATTERN: OnceCell<Regex> = OnceCell::new();
    PATTERN.get_or_try_init(|| {
        Regex::new(r"\$\{([^}]+)\}").map_err(|e| ConfigError::EnvSubstitutionError(e.to_string()))
    })
}

/// Replaces `${VAR}`, `${VAR:-default}` and `${VAR:?message}` references.
fn substitute_env_vars(content: &str) -> Result<String, ConfigError> {
    let pattern = env_pattern()?;
    let mut result = String::with_capacity(content.len());
    let mut last = 0;
    for cap in pattern.captures_iter(content) {
        let (Some(whole), Some(expr)) = (cap.get(0), cap.get(1)) else {
            continue;
        };
        result.push_str(&content[last..whole.start()]);
        result.push_str(&resolve_var(expr.as_str())?);
        last = whole.end();
    }
    result.push_str(&content[last..]);
    Ok(result)
}

fn resolve_var(expr: &str) -> Result<String, ConfigError> {
    if let Some((name, default)) = expr.split_once(":-") {
        Ok(env::var(name).unwrap_or_else(|_| default.to_string()))
    } else if let Some((name, message)) = expr.split_once(":?") {
        env::var(name).map_err(|_| {
            ConfigError::EnvSubstitutionError(format!(
                "Required environment variable '{}' is not set: {}",
                name, message
            ))
        })
    } else {
        env::var(expr).map_err(|_| {
            ConfigError::EnvSubstitutionError(format!(
                "Required environment variable '{}' is not set",
                expr
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults_are_valid() {
        let config = CourierConfig::builder().build().unwrap();
        assert_eq!(config.max_workers(), 10);
        assert_eq!(config.max_attempts(), 15);
        assert_eq!(config.archival_days(), 32);
        assert_eq!(config.max_connections_level(), 75);
        assert_eq!(config.claim_timeout(), Duration::from_secs(600));
        assert_eq!(config.retention(), Duration::from_secs(3600));
        assert!(!config.ignore_archived());
    }

    #[test]
    fn test_build_rejects_bad_values() {
        let err = CourierConfig::builder().max_workers(0).build().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "max_workers", .. }));

        let err = CourierConfig::builder()
            .task_timeout(Duration::from_secs(600))
            .claim_timeout(Duration::from_secs(60))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "claim_timeout", .. }));

        let err = CourierConfig::builder().max_connections_level(120).build().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "max_connections_level", .. }));
    }

    #[test]
    fn test_file_sections_override_defaults() {
        let file = ConfigLoader::new()
            .parse(
                r#"
                [scheduler]
                max_workers = 3
                worker_cooldown_ms = 250

                [delivery]
                archival_days = 7
                relay_deny_tags = ["nsfw"]
                "#,
            )
            .unwrap();
        let config = file.into_config().unwrap();
        assert_eq!(config.max_workers(), 3);
        assert_eq!(config.worker_cooldown(), Duration::from_millis(250));
        assert_eq!(config.archival_days(), 7);
        assert_eq!(config.relay_deny_tags(), ["nsfw".to_string()]);
        assert_eq!(config.max_attempts(), 15);
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let result = ConfigLoader::new().parse("[scheduler]\nmax_wrokers = 3\n");
        assert!(matches!(result, Err(ConfigError::TomlParseError(_))));
    }

    #[test]
    #[serial]
    fn test_env_substitution_with_default() {
        env::remove_var("COURIER_TEST_DB");
        let file = ConfigLoader::new()
            .parse("[database]\nurl = \"${COURIER_TEST_DB:-sqlite:///tmp/q.db}\"\n")
            .unwrap();
        assert_eq!(file.database.url.as_deref(), Some("sqlite:///tmp/q.db"));
    }

    #[test]
    #[serial]
    fn test_env_substitution_with_existing_var() {
        env::set_var("COURIER_TEST_DB", "postgres://db/courier");
        let file = ConfigLoader::new()
            .parse("[database]\nurl = \"${COURIER_TEST_DB:-sqlite:///tmp/q.db}\"\n")
            .unwrap();
        assert_eq!(file.database.url.as_deref(), Some("postgres://db/courier"));
        env::remove_var("COURIER_TEST_DB");
    }

    #[test]
    #[serial]
    fn test_env_substitution_custom_error() {
        env::remove_var("COURIER_REQUIRED");
        let err = substitute_env_vars("url = \"${COURIER_REQUIRED:?set the database}\"").unwrap_err();
        assert!(err.to_string().contains("set the database"));
        assert!(substitute_env_vars("${COURIER_REQUIRED}").is_err());
    }

    #[test]
    fn test_load_from_file_and_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("courier.toml");
        fs::write(&path, "[delivery]\nignore_archived = true\n").unwrap();

        let loader = ConfigLoader::with_search_paths(vec![path.clone()]);
        assert_eq!(loader.find_config_file(), Some(path.clone()));
        let config = loader.load_from_file(&path).unwrap().into_config().unwrap();
        assert!(config.ignore_archived());

        let empty = ConfigLoader::with_search_paths(vec![dir.path().join("absent.toml")]);
        assert!(empty.find_config_file().is_none());
        assert!(matches!(
            empty.load_from_file(&dir.path().join("absent.toml")),
            Err(ConfigError::ReadError { .. })
        ));
    }
}

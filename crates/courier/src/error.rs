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

//! Error types for the delivery engine.
//!
//! Each layer has its own enum: storage failures surface as [`StoreError`],
//! and the layers above wrap it rather than flattening everything into one
//! type.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the data access layer and the database module.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to obtain or drive a pooled connection.
    #[error("Connection pool error: {0}")]
    ConnectionPool(String),

    /// The database rejected a query.
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    /// A connection URL could not be understood.
    #[error("Invalid database URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    /// Embedded migrations failed to apply.
    #[error("Migration error: {0}")]
    Migration(String),

    /// Task parameters could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored value could not be mapped back to a domain type.
    #[error("Invalid stored value: {0}")]
    InvalidRow(String),

    /// A requested row does not exist.
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },
}

impl StoreError {
    /// Normalizes `url`, mapping a parse failure to [`StoreError::InvalidUrl`].
    pub fn normalized_url(url: &str) -> Result<String, StoreError> {
        crate::models::normalize_url(url).map_err(|e| StoreError::InvalidUrl {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

/// Errors decoding a stored task into a typed [`crate::Command`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown command '{0}'")]
    UnknownCommand(String),

    #[error("Command '{command}' expects {expected} parameters, got {actual}")]
    ParameterCount {
        command: String,
        expected: usize,
        actual: usize,
    },

    #[error("Command '{command}' has an invalid parameter at position {position}: {message}")]
    InvalidParameter {
        command: String,
        position: usize,
        message: String,
    },
}

/// Errors raised while fanning content out to delivery tasks.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invalid endpoint URL '{url}': {source}")]
    InvalidEndpoint {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

/// Errors raised by the task scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("No protocol adapter registered for '{0}'")]
    MissingAdapter(String),

    #[error("Work signal error: {0}")]
    Signal(String),

    #[error("Scheduler is shutting down")]
    ShuttingDown,
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found in any search location")]
    ConfigNotFound,

    #[error("Failed to read configuration file {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("Environment variable substitution failed: {0}")]
    EnvSubstitutionError(String),

    #[error("Unsupported configuration file format: {extension}")]
    UnsupportedFormat { extension: String },

    #[error("Invalid configuration value for '{field}': {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

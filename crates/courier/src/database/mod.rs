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

//! Durable storage for the delivery engine.
//!
//! The backend (PostgreSQL or SQLite) is chosen at runtime from the
//! connection URL; both backends share one Diesel schema and carry their own
//! embedded migrations.

pub mod connection;
pub mod schema;

pub use connection::{AnyPool, BackendType, Database, PoolUsage};

use diesel_migrations::{embed_migrations, EmbeddedMigrations};

/// Migrations for the PostgreSQL backend.
pub const POSTGRES_MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations/postgres");

/// Migrations for the SQLite backend.
pub const SQLITE_MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations/sqlite");

/// Current wall-clock time as stored in timestamp columns (UTC, naive).
pub fn now() -> chrono::NaiveDateTime {
    chrono::Utc::now().naive_utc()
}

/// Converts a stored naive timestamp to UTC.
pub fn utc(ts: chrono::NaiveDateTime) -> chrono::DateTime<chrono::Utc> {
    ts.and_utc()
}

/// Converts a std duration to a chrono one, saturating at a century.
pub(crate) fn to_chrono(duration: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

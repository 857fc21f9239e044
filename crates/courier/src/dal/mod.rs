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

//! Data Access Layer with runtime backend selection.
//!
//! One [`DAL`] handle hands out a small accessor per table. Every accessor
//! method runs its queries inside a single transaction on a pooled
//! connection; on SQLite that transaction is `IMMEDIATE` so that separate
//! worker processes serialize their writes instead of deadlocking on lock
//! upgrades.
//!
//! # Example
//!
//! ```rust,ignore
//! use courier::dal::DAL;
//! use courier::database::Database;
//!
//! let db = Database::try_new("sqlite:///var/lib/courier/queue.db", 1)?;
//! let dal = DAL::new(db);
//!
//! let stats = dal.task_queue().stats().await?;
//! ```

use crate::database::{AnyPool, BackendType, Database};

pub mod delivery;
pub mod delivery_record;
pub mod inbox_status;
pub mod models;
pub mod remote_contact;
pub mod remote_server;
pub mod task_queue;
pub mod worker_ipc;

pub use delivery::{DeliveryDAL, Finalized, TaskDisposition};
pub use delivery_record::DeliveryRecordDAL;
pub use inbox_status::InboxStatusDAL;
pub use remote_contact::RemoteContactDAL;
pub use remote_server::RemoteServerDAL;
pub use task_queue::{ClaimRequest, DeferResult, Enqueued, QueueStats, TaskQueueDAL};
pub use worker_ipc::WorkerIpcDAL;

/// Runs `$body` inside a transaction on whichever backend `$dal` uses.
///
/// The body is expanded once per backend, so it must only use query-builder
/// code (or `sql_query`) that both backends accept. It evaluates to
/// `Result<T, StoreError>`.
///
/// ```rust,ignore
/// let count: i64 = with_transaction!(self.dal, |conn| {
///     Ok(workerqueue::table.count().get_result(conn)?)
/// })?;
/// ```
#[macro_export]
macro_rules! with_transaction {
    ($dal:expr, |$conn:ident| $body:block) => {{
        match $dal.backend() {
            $crate::database::BackendType::Postgres => {
                use diesel::connection::Connection as _;
                let pooled = $dal.database.get_postgres_connection().await?;
                pooled
                    .interact(move |$conn| {
                        $conn.transaction::<_, $crate::error::StoreError, _>(|$conn| $body)
                    })
                    .await
                    .map_err(|e| $crate::error::StoreError::ConnectionPool(e.to_string()))
                    .and_then(|result| result)
            }
            $crate::database::BackendType::Sqlite => {
                let pooled = $dal.database.get_sqlite_connection().await?;
                pooled
                    .interact(move |$conn| {
                        $conn.immediate_transaction::<_, $crate::error::StoreError, _>(|$conn| $body)
                    })
                    .await
                    .map_err(|e| $crate::error::StoreError::ConnectionPool(e.to_string()))
                    .and_then(|result| result)
            }
        }
    }};
}

/// The Data Access Layer.
///
/// `DAL` is `Clone`; clones share the underlying connection pool.
#[derive(Clone, Debug)]
pub struct DAL {
    /// The database instance with connection pool
    pub database: Database,
}

impl DAL {
    pub fn new(database: Database) -> Self {
        DAL { database }
    }

    /// Returns the backend type for this DAL instance.
    pub fn backend(&self) -> BackendType {
        self.database.backend()
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn pool(&self) -> AnyPool {
        self.database.pool()
    }

    /// Task store operations.
    pub fn task_queue(&self) -> TaskQueueDAL {
        TaskQueueDAL::new(self)
    }

    /// Atomic finalization of delivery attempts.
    pub fn delivery(&self) -> DeliveryDAL {
        DeliveryDAL::new(self)
    }

    pub fn delivery_record(&self) -> DeliveryRecordDAL {
        DeliveryRecordDAL::new(self)
    }

    pub fn inbox_status(&self) -> InboxStatusDAL {
        InboxStatusDAL::new(self)
    }

    pub fn remote_server(&self) -> RemoteServerDAL {
        RemoteServerDAL::new(self)
    }

    pub fn remote_contact(&self) -> RemoteContactDAL {
        RemoteContactDAL::new(self)
    }

    pub fn worker_ipc(&self) -> WorkerIpcDAL {
        WorkerIpcDAL::new(self)
    }
}

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

//! Claiming tasks for execution.
//!
//! A claim is one conditional `UPDATE ... RETURNING`: the rows a worker gets
//! back are exactly the rows whose `claimed_by` it overwrote. On PostgreSQL
//! the candidate rows are locked with `FOR UPDATE SKIP LOCKED` so concurrent
//! claimers pass over each other's rows instead of queueing behind them. On
//! SQLite the surrounding `IMMEDIATE` transaction serializes claimers.

use std::time::Duration;

use diesel::prelude::*;
use diesel::sql_types::{BigInt, Integer, Timestamp};
use tracing::debug;

use super::TaskQueueDAL;
use crate::dal::models::TaskRow;
use crate::database::{now, to_chrono, BackendType};
use crate::error::StoreError;
use crate::models::{Priority, Task};

/// How long a claim may be held before another worker may take the task.
pub const DEFAULT_CLAIM_TIMEOUT: Duration = Duration::from_secs(10 * 60);

const POSTGRES_CLAIM: &str = r#"
    UPDATE workerqueue
    SET claimed_by = $1, executed_at = $2
    WHERE id IN (
        SELECT id FROM workerqueue
        WHERE NOT done
          AND next_attempt_at <= $2
          AND priority <= $3
          AND (claimed_by = 0 OR executed_at IS NULL OR executed_at < $4)
        ORDER BY priority ASC, attempt_count ASC, created_at ASC, id ASC
        LIMIT $5
        FOR UPDATE SKIP LOCKED
    )
    RETURNING id, command, parameters, priority, created_at, claimed_by,
              executed_at, next_attempt_at, attempt_count, done, outcome, dedup_key
"#;

const SQLITE_CLAIM: &str = r#"
    UPDATE workerqueue
    SET claimed_by = ?1, executed_at = ?2
    WHERE id IN (
        SELECT id FROM workerqueue
        WHERE NOT done
          AND next_attempt_at <= ?2
          AND priority <= ?3
          AND (claimed_by = 0 OR executed_at IS NULL OR executed_at < ?4)
        ORDER BY priority ASC, attempt_count ASC, created_at ASC, id ASC
        LIMIT ?5
    )
    RETURNING id, command, parameters, priority, created_at, claimed_by,
              executed_at, next_attempt_at, attempt_count, done, outcome, dedup_key
"#;

/// Parameters of a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimRequest {
    pub limit: usize,
    pub worker_id: i64,
    /// Claims older than this are treated as abandoned and may be taken.
    pub claim_timeout: Duration,
    /// Only claim tasks at this priority or more urgent.
    pub max_priority: Option<Priority>,
}

impl ClaimRequest {
    pub fn new(limit: usize, worker_id: i64) -> Self {
        Self {
            limit,
            worker_id,
            claim_timeout: DEFAULT_CLAIM_TIMEOUT,
            max_priority: None,
        }
    }

    pub fn with_claim_timeout(mut self, timeout: Duration) -> Self {
        self.claim_timeout = timeout;
        self
    }

    pub fn at_or_above(mut self, priority: Priority) -> Self {
        self.max_priority = Some(priority);
        self
    }
}

impl<'a> TaskQueueDAL<'a> {
    /// Claims up to `limit` due tasks for `worker_id`.
    ///
    /// Tasks come back ordered by priority, then attempt count, then age.
    /// No task is ever returned to two concurrent callers.
    pub async fn claim_batch(&self, limit: usize, worker_id: i64) -> Result<Vec<Task>, StoreError> {
        self.claim_with(ClaimRequest::new(limit, worker_id)).await
    }

    /// Claims tasks as described by `request`.
    pub async fn claim_with(&self, request: ClaimRequest) -> Result<Vec<Task>, StoreError> {
        if request.limit == 0 {
            return Ok(Vec::new());
        }
        if request.worker_id == 0 {
            return Err(StoreError::InvalidRow(
                "worker id 0 is reserved for unclaimed tasks".to_string(),
            ));
        }

        let sql = match self.dal.backend() {
            BackendType::Postgres => POSTGRES_CLAIM,
            BackendType::Sqlite => SQLITE_CLAIM,
        };
        let claimed_at = now();
        let stale_cutoff = claimed_at - to_chrono(request.claim_timeout);
        let max_priority = request.max_priority.map_or(i32::MAX, Priority::value);
        let limit = i64::try_from(request.limit).unwrap_or(i64::MAX);
        let worker_id = request.worker_id;

        let mut rows: Vec<TaskRow> = crate::with_transaction!(self.dal, |conn| {
            Ok(diesel::sql_query(sql)
                .bind::<BigInt, _>(worker_id)
                .bind::<Timestamp, _>(claimed_at)
                .bind::<Integer, _>(max_priority)
                .bind::<Timestamp, _>(stale_cutoff)
                .bind::<BigInt, _>(limit)
                .load::<TaskRow>(conn)?)
        })?;

        // RETURNING gives no ordering guarantee.
        rows.sort_by(|a, b| {
            (a.priority, a.attempt_count, a.created_at, a.id).cmp(&(
                b.priority,
                b.attempt_count,
                b.created_at,
                b.id,
            ))
        });

        if !rows.is_empty() {
            debug!(worker_id, claimed = rows.len(), "Claimed tasks");
        }
        rows.into_iter().map(Task::try_from).collect()
    }
}

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

//! Task store: the durable `workerqueue` table.
//!
//! Producers [`enqueue`](TaskQueueDAL::enqueue) work; schedulers
//! [`claim_batch`](TaskQueueDAL::claim_batch) it, and either complete or
//! defer what they claimed. Claiming is a single conditional `UPDATE`, so
//! no two workers can hold the same task even across processes.

mod claiming;

pub use claiming::{ClaimRequest, DEFAULT_CLAIM_TIMEOUT};

use std::collections::BTreeMap;
use std::time::Duration;

use diesel::prelude::*;
use tracing::{debug, info, warn};

use super::models::{NewTaskRow, TaskRow};
use super::DAL;
use crate::command::Command;
use crate::database::schema::workerqueue;
use crate::database::{now, to_chrono};
use crate::error::StoreError;
use crate::models::{Priority, Task, TaskOutcome};
use crate::retry::{RetryDecision, RetryPolicy};

/// Result of submitting a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Enqueued {
    pub id: i64,
    /// `false` when an identical live task already existed.
    pub inserted: bool,
}

/// Result of deferring a claimed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferResult {
    /// Back in the queue as attempt `attempt`.
    Rescheduled {
        attempt: i32,
        next_attempt_at: chrono::DateTime<chrono::Utc>,
    },
    /// The attempt ceiling was reached and the task is done.
    Exhausted { attempts: i32 },
    /// The task was no longer held by this worker; nothing changed.
    Stale,
}

/// Queue counts for the administration surface.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Never attempted, waiting to be claimed.
    pub pending: i64,
    /// Failed at least once, waiting to be claimed.
    pub deferred: i64,
    pub claimed: i64,
    pub done: i64,
    pub failed: i64,
    /// Waiting tasks per priority value.
    pub waiting_by_priority: BTreeMap<i32, i64>,
}

/// Data access for the task store.
#[derive(Clone)]
pub struct TaskQueueDAL<'a> {
    dal: &'a DAL,
}

impl<'a> TaskQueueDAL<'a> {
    pub fn new(dal: &'a DAL) -> Self {
        Self { dal }
    }

    /// Appends a task and returns its id.
    ///
    /// If a live (not done) task with the same command and parameters exists,
    /// its id is returned instead.
    pub async fn enqueue(&self, command: &Command, priority: Priority) -> Result<i64, StoreError> {
        Ok(self.submit(command, priority, None).await?.id)
    }

    /// Appends a task that must not run before `not_before`.
    pub async fn enqueue_at(
        &self,
        command: &Command,
        priority: Priority,
        not_before: chrono::DateTime<chrono::Utc>,
    ) -> Result<i64, StoreError> {
        Ok(self.submit(command, priority, Some(not_before)).await?.id)
    }

    /// Appends a task, reporting whether a new row was written.
    ///
    /// A duplicate of a waiting task with lower urgency promotes the waiting
    /// task to `priority`.
    pub async fn submit(
        &self,
        command: &Command,
        priority: Priority,
        not_before: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<Enqueued, StoreError> {
        let parameters = serde_json::to_string(&command.parameters())?;
        let name = command.name().to_string();
        let dedup_key = command.dedup_key();

        // A concurrent producer may insert the same key between our check and
        // our insert; the partial unique index rejects the loser, which then
        // finds the winner's row on the second pass.
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self
                .submit_once(&name, &parameters, &dedup_key, priority, not_before)
                .await;
            match result {
                Err(StoreError::Database(diesel::result::Error::DatabaseError(
                    diesel::result::DatabaseErrorKind::UniqueViolation,
                    _,
                ))) if attempt < 3 => {
                    debug!(command = %name, "Lost enqueue race, retrying dedup lookup");
                }
                other => return other,
            }
        }
    }

    async fn submit_once(
        &self,
        name: &str,
        parameters: &str,
        dedup_key: &str,
        priority: Priority,
        not_before: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<Enqueued, StoreError> {
        let created_at = now();
        let new_row = NewTaskRow {
            command: name.to_string(),
            parameters: parameters.to_string(),
            priority: priority.value(),
            created_at,
            claimed_by: 0,
            next_attempt_at: not_before.map_or(created_at, |t| t.naive_utc()),
            attempt_count: 0,
            done: false,
            dedup_key: dedup_key.to_string(),
        };

        let enqueued = crate::with_transaction!(self.dal, |conn| {
            let existing: Option<(i64, i32, i64)> = workerqueue::table
                .filter(workerqueue::dedup_key.eq(&new_row.dedup_key))
                .filter(workerqueue::done.eq(false))
                .select((
                    workerqueue::id,
                    workerqueue::priority,
                    workerqueue::claimed_by,
                ))
                .first(conn)
                .optional()?;

            if let Some((id, current, claimed_by)) = existing {
                if new_row.priority < current && claimed_by == 0 {
                    diesel::update(workerqueue::table.find(id))
                        .set(workerqueue::priority.eq(new_row.priority))
                        .execute(conn)?;
                }
                return Ok(Enqueued {
                    id,
                    inserted: false,
                });
            }

            let id: i64 = diesel::insert_into(workerqueue::table)
                .values(&new_row)
                .returning(workerqueue::id)
                .get_result(conn)?;
            Ok(Enqueued { id, inserted: true })
        })?;

        if enqueued.inserted {
            debug!(task_id = enqueued.id, command = name, "Task enqueued");
        } else {
            debug!(task_id = enqueued.id, command = name, "Duplicate task suppressed");
        }
        Ok(enqueued)
    }

    /// Fetches a task by id.
    pub async fn get(&self, task_id: i64) -> Result<Option<Task>, StoreError> {
        let row: Option<TaskRow> = crate::with_transaction!(self.dal, |conn| {
            Ok(workerqueue::table
                .find(task_id)
                .select(TaskRow::as_select())
                .first(conn)
                .optional()?)
        })?;
        row.map(Task::try_from).transpose()
    }

    /// Whether `worker_id` still holds a live claim on the task.
    pub async fn is_held_by(&self, task_id: i64, worker_id: i64) -> Result<bool, StoreError> {
        let count: i64 = crate::with_transaction!(self.dal, |conn| {
            Ok(workerqueue::table
                .filter(workerqueue::id.eq(task_id))
                .filter(workerqueue::done.eq(false))
                .filter(workerqueue::claimed_by.eq(worker_id))
                .count()
                .get_result(conn)?)
        })?;
        Ok(count > 0)
    }

    /// Marks a claimed task done.
    ///
    /// Returns `false`, changing nothing, if the task was finished or
    /// reclaimed by someone else in the meantime.
    pub async fn complete(
        &self,
        task_id: i64,
        worker_id: i64,
        outcome: TaskOutcome,
    ) -> Result<bool, StoreError> {
        let outcome_text = outcome.as_str().to_string();
        let updated = crate::with_transaction!(self.dal, |conn| {
            Ok(diesel::update(
                workerqueue::table
                    .filter(workerqueue::id.eq(task_id))
                    .filter(workerqueue::done.eq(false))
                    .filter(workerqueue::claimed_by.eq(worker_id)),
            )
            .set((
                workerqueue::done.eq(true),
                workerqueue::outcome.eq(Some(outcome_text)),
                workerqueue::executed_at.eq(Some(now())),
            ))
            .execute(conn)?)
        })?;

        if updated == 0 {
            warn!(task_id, worker_id, "Completion ignored: task no longer held");
        }
        Ok(updated == 1)
    }

    /// Marks a task done from outside any worker.
    ///
    /// A worker still executing it will find the task finished when it tries
    /// to record its result, and drops that result.
    pub async fn cancel(&self, task_id: i64) -> Result<bool, StoreError> {
        let updated = crate::with_transaction!(self.dal, |conn| {
            Ok(diesel::update(
                workerqueue::table
                    .filter(workerqueue::id.eq(task_id))
                    .filter(workerqueue::done.eq(false)),
            )
            .set((
                workerqueue::done.eq(true),
                workerqueue::outcome.eq(Some(TaskOutcome::Cancelled.as_str())),
                workerqueue::executed_at.eq(Some(now())),
            ))
            .execute(conn)?)
        })?;
        Ok(updated == 1)
    }

    /// Pushes a claimed task back by a fixed `delay`, counting one more
    /// attempt and keeping its priority.
    ///
    /// Returns `false` if the task was no longer held by `worker_id`.
    pub async fn defer_by(
        &self,
        task_id: i64,
        worker_id: i64,
        delay: Duration,
    ) -> Result<bool, StoreError> {
        let next_attempt_at = now() + to_chrono(delay);
        let updated = crate::with_transaction!(self.dal, |conn| {
            Ok(diesel::update(
                workerqueue::table
                    .filter(workerqueue::id.eq(task_id))
                    .filter(workerqueue::done.eq(false))
                    .filter(workerqueue::claimed_by.eq(worker_id)),
            )
            .set((
                workerqueue::attempt_count.eq(workerqueue::attempt_count + 1),
                workerqueue::next_attempt_at.eq(next_attempt_at),
                workerqueue::claimed_by.eq(0i64),
            ))
            .execute(conn)?)
        })?;
        Ok(updated == 1)
    }

    /// Defers a claimed task according to `policy`, finishing it as
    /// `attempts_exhausted` once the ceiling is reached.
    pub async fn defer(
        &self,
        task_id: i64,
        worker_id: i64,
        policy: &RetryPolicy,
    ) -> Result<DeferResult, StoreError> {
        let policy = policy.clone();
        let result = crate::with_transaction!(self.dal, |conn| {
            let held: Option<(i32, i32)> = workerqueue::table
                .filter(workerqueue::id.eq(task_id))
                .filter(workerqueue::done.eq(false))
                .filter(workerqueue::claimed_by.eq(worker_id))
                .select((workerqueue::attempt_count, workerqueue::priority))
                .first(conn)
                .optional()?;
            let Some((attempt_count, priority)) = held else {
                return Ok(DeferResult::Stale);
            };

            let now = now();
            match policy.next(attempt_count, Priority(priority)) {
                RetryDecision::Retry {
                    attempt,
                    delay,
                    priority,
                } => {
                    let next_attempt_at = now + to_chrono(delay);
                    diesel::update(workerqueue::table.find(task_id))
                        .set((
                            workerqueue::attempt_count.eq(attempt),
                            workerqueue::next_attempt_at.eq(next_attempt_at),
                            workerqueue::priority.eq(priority.value()),
                            workerqueue::claimed_by.eq(0i64),
                        ))
                        .execute(conn)?;
                    Ok(DeferResult::Rescheduled {
                        attempt,
                        next_attempt_at: next_attempt_at.and_utc(),
                    })
                }
                RetryDecision::GiveUp { attempts } => {
                    diesel::update(workerqueue::table.find(task_id))
                        .set((
                            workerqueue::done.eq(true),
                            workerqueue::outcome
                                .eq(Some(TaskOutcome::AttemptsExhausted.as_str())),
                            workerqueue::executed_at.eq(Some(now)),
                        ))
                        .execute(conn)?;
                    Ok(DeferResult::Exhausted { attempts })
                }
            }
        })?;

        match result {
            DeferResult::Exhausted { attempts } => {
                warn!(task_id, attempts, "Task gave up after reaching the attempt ceiling");
                metrics::counter!("courier_tasks_exhausted_total").increment(1);
            }
            DeferResult::Rescheduled { attempt, .. } => {
                debug!(task_id, attempt, "Task deferred");
                metrics::counter!("courier_tasks_deferred_total").increment(1);
            }
            DeferResult::Stale => {
                warn!(task_id, worker_id, "Deferral ignored: task no longer held");
            }
        }
        Ok(result)
    }

    /// Releases claims held longer than `timeout`.
    ///
    /// This is the crash-recovery path: a worker that died mid-task leaves
    /// its claim behind, and the task becomes claimable again.
    pub async fn abandon_stale_claims(&self, timeout: Duration) -> Result<usize, StoreError> {
        let cutoff = now() - to_chrono(timeout);
        let released = crate::with_transaction!(self.dal, |conn| {
            Ok(diesel::update(
                workerqueue::table
                    .filter(workerqueue::done.eq(false))
                    .filter(workerqueue::claimed_by.ne(0i64))
                    .filter(workerqueue::executed_at.lt(cutoff)),
            )
            .set(workerqueue::claimed_by.eq(0i64))
            .execute(conn)?)
        })?;

        if released > 0 {
            warn!(released, "Released stale task claims");
            metrics::counter!("courier_stale_claims_released_total").increment(released as u64);
        }
        Ok(released)
    }

    /// Deletes finished tasks last executed before `now - older_than`.
    pub async fn purge_done(&self, older_than: Duration) -> Result<usize, StoreError> {
        let cutoff = now() - to_chrono(older_than);
        let deleted = crate::with_transaction!(self.dal, |conn| {
            Ok(diesel::delete(
                workerqueue::table
                    .filter(workerqueue::done.eq(true))
                    .filter(workerqueue::executed_at.lt(cutoff)),
            )
            .execute(conn)?)
        })?;

        if deleted > 0 {
            info!(deleted, "Purged finished tasks");
        }
        Ok(deleted)
    }

    /// Counts what [`purge_done`](Self::purge_done) would delete.
    pub async fn count_done_older_than(&self, older_than: Duration) -> Result<i64, StoreError> {
        let cutoff = now() - to_chrono(older_than);
        crate::with_transaction!(self.dal, |conn| {
            Ok(workerqueue::table
                .filter(workerqueue::done.eq(true))
                .filter(workerqueue::executed_at.lt(cutoff))
                .count()
                .get_result(conn)?)
        })
    }

    /// Queue counts by lifecycle state.
    pub async fn stats(&self) -> Result<QueueStats, StoreError> {
        let rows: Vec<(bool, i64, i32, i32, Option<String>)> =
            crate::with_transaction!(self.dal, |conn| {
                Ok(workerqueue::table
                    .select((
                        workerqueue::done,
                        workerqueue::claimed_by,
                        workerqueue::attempt_count,
                        workerqueue::priority,
                        workerqueue::outcome,
                    ))
                    .load(conn)?)
            })?;

        let mut stats = QueueStats::default();
        for (done, claimed_by, attempt_count, priority, outcome) in rows {
            if done {
                stats.done += 1;
                let failed = outcome
                    .as_deref()
                    .and_then(TaskOutcome::from_str)
                    .map_or(false, |o| o.is_failure());
                if failed {
                    stats.failed += 1;
                }
            } else if claimed_by != 0 {
                stats.claimed += 1;
            } else {
                if attempt_count > 0 {
                    stats.deferred += 1;
                } else {
                    stats.pending += 1;
                }
                *stats.waiting_by_priority.entry(priority).or_insert(0) += 1;
            }
        }
        Ok(stats)
    }

    /// Most urgent priority among tasks that are due and unclaimed.
    pub async fn highest_pending_priority(&self) -> Result<Option<Priority>, StoreError> {
        let now = now();
        let priority: Option<i32> = crate::with_transaction!(self.dal, |conn| {
            Ok(workerqueue::table
                .filter(workerqueue::done.eq(false))
                .filter(workerqueue::claimed_by.eq(0i64))
                .filter(workerqueue::next_attempt_at.le(now))
                .select(diesel::dsl::min(workerqueue::priority))
                .first(conn)?)
        })?;
        Ok(priority.map(Priority))
    }

    /// Number of claimed tasks at `priority` or more urgent.
    pub async fn claimed_with_priority_at_most(&self, priority: Priority) -> Result<i64, StoreError> {
        let value = priority.value();
        crate::with_transaction!(self.dal, |conn| {
            Ok(workerqueue::table
                .filter(workerqueue::done.eq(false))
                .filter(workerqueue::claimed_by.ne(0i64))
                .filter(workerqueue::priority.le(value))
                .count()
                .get_result(conn)?)
        })
    }
}

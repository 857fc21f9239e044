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

//! Recording the outcome of one delivery attempt.
//!
//! A delivery touches five tables: the task, the content's counters, the
//! endpoint's health record, the contacts behind the endpoint, and the
//! server hosting it. [`DeliveryDAL::finalize`] writes all of them in one
//! transaction, and only if the caller still holds the task. A result that
//! arrives after the task was cancelled or reclaimed changes nothing.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use tracing::{debug, info, warn};

use super::models::{CounterRow, InboxStatusRow};
use super::remote_server::next_contact_after_failure;
use super::DAL;
use crate::command::DeliveryTarget;
use crate::database::schema::{
    delivery_counters, inbox_status, remote_contacts, remote_servers, workerqueue,
};
use crate::database::{now, to_chrono, utc};
use crate::error::StoreError;
use crate::health::{HealthPolicy, HealthState, Transition};
use crate::models::{Priority, TaskOutcome};
use crate::protocol::DeliveryOutcome;
use crate::retry::{RetryDecision, RetryPolicy};

/// What happened to the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskDisposition {
    Delivered,
    /// Failed transiently and was put back in the queue.
    Rescheduled {
        attempt: i32,
        next_attempt_at: DateTime<Utc>,
    },
    /// Failed permanently.
    Rejected,
    /// Failed transiently once too often.
    Exhausted { attempts: i32 },
}

impl TaskDisposition {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskDisposition::Rescheduled { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finalized {
    Applied {
        disposition: TaskDisposition,
        /// Health change of the endpoint.
        health: Transition,
    },
    /// The task was already done or held by another worker.
    Stale,
}

#[derive(Clone)]
pub struct DeliveryDAL<'a> {
    dal: &'a DAL,
}

impl<'a> DeliveryDAL<'a> {
    pub fn new(dal: &'a DAL) -> Self {
        Self { dal }
    }

    /// Applies `outcome` of delivering `target` under `task_id`.
    pub async fn finalize(
        &self,
        task_id: i64,
        worker_id: i64,
        target: &DeliveryTarget,
        outcome: &DeliveryOutcome,
        retry: &RetryPolicy,
        health: &HealthPolicy,
    ) -> Result<Finalized, StoreError> {
        let owned = target.clone();
        let success = outcome.is_success();
        let permanent = matches!(outcome, DeliveryOutcome::PermanentFailure(_));
        let retry = retry.clone();
        let policy = health.clone();
        let ts = now();
        let at = utc(ts);

        let finalized = crate::with_transaction!(self.dal, |conn| {
            let held: Option<(i32, i32)> = workerqueue::table
                .filter(workerqueue::id.eq(task_id))
                .filter(workerqueue::done.eq(false))
                .filter(workerqueue::claimed_by.eq(worker_id))
                .select((workerqueue::attempt_count, workerqueue::priority))
                .first(conn)
                .optional()?;
            let Some((attempt_count, priority)) = held else {
                return Ok(Finalized::Stale);
            };

            let disposition = if success {
                TaskDisposition::Delivered
            } else if permanent {
                TaskDisposition::Rejected
            } else {
                match retry.next(attempt_count, Priority(priority)) {
                    RetryDecision::Retry {
                        attempt,
                        delay,
                        priority,
                    } => {
                        let next_attempt_at = ts + to_chrono(delay);
                        diesel::update(workerqueue::table.find(task_id))
                            .set((
                                workerqueue::attempt_count.eq(attempt),
                                workerqueue::next_attempt_at.eq(next_attempt_at),
                                workerqueue::priority.eq(priority.value()),
                                workerqueue::claimed_by.eq(0i64),
                            ))
                            .execute(conn)?;
                        TaskDisposition::Rescheduled {
                            attempt,
                            next_attempt_at: utc(next_attempt_at),
                        }
                    }
                    RetryDecision::GiveUp { attempts } => TaskDisposition::Exhausted { attempts },
                }
            };

            let terminal = match disposition {
                TaskDisposition::Delivered => Some(TaskOutcome::Success),
                TaskDisposition::Rejected => Some(TaskOutcome::PermanentFailure),
                TaskDisposition::Exhausted { .. } => Some(TaskOutcome::AttemptsExhausted),
                TaskDisposition::Rescheduled { .. } => None,
            };
            if let Some(task_outcome) = terminal {
                diesel::update(workerqueue::table.find(task_id))
                    .set((
                        workerqueue::done.eq(true),
                        workerqueue::outcome.eq(Some(task_outcome.as_str())),
                        workerqueue::executed_at.eq(Some(ts)),
                    ))
                    .execute(conn)?;

                let (delivered, failed) = if success { (1i64, 0i64) } else { (0, 1) };
                let counters = CounterRow {
                    content_id: owned.content_id.clone(),
                    protocol: owned.protocol.as_str().to_string(),
                    queued: 1,
                    delivered,
                    failed,
                };
                diesel::insert_into(delivery_counters::table)
                    .values(&counters)
                    .on_conflict((delivery_counters::content_id, delivery_counters::protocol))
                    .do_update()
                    .set((
                        delivery_counters::delivered.eq(delivery_counters::delivered + delivered),
                        delivery_counters::failed.eq(delivery_counters::failed + failed),
                    ))
                    .execute(conn)?;
            }

            let mut status: InboxStatusRow = inbox_status::table
                .find(&owned.endpoint)
                .select(InboxStatusRow::as_select())
                .first(conn)
                .optional()?
                .unwrap_or_else(|| InboxStatusRow::fresh(&owned.endpoint, false, ts));
            let mut record = status.health();
            let transition = if success {
                record.record_success(at, &policy)
            } else {
                record.record_failure(at, &policy)
            };
            status.apply(&record);
            diesel::insert_into(inbox_status::table)
                .values(&status)
                .on_conflict(inbox_status::url)
                .do_update()
                .set(&status)
                .execute(conn)?;

            let via_endpoint = remote_contacts::inbox
                .eq(owned.endpoint.clone())
                .or(remote_contacts::shared_inbox.eq(owned.endpoint.clone()));
            if success {
                diesel::update(remote_contacts::table.filter(via_endpoint))
                    .set((
                        remote_contacts::last_delivered.eq(Some(ts)),
                        remote_contacts::archived.eq(false),
                    ))
                    .execute(conn)?;
            } else {
                diesel::update(remote_contacts::table.filter(via_endpoint))
                    .set(remote_contacts::last_failed_delivery.eq(Some(ts)))
                    .execute(conn)?;
                // Failures only ever archive; reviving takes a success.
                if transition.to == HealthState::Archived {
                    diesel::update(
                        remote_contacts::table.filter(
                            remote_contacts::inbox
                                .eq(owned.endpoint.clone())
                                .or(remote_contacts::shared_inbox.eq(owned.endpoint.clone())),
                        ),
                    )
                    .set(remote_contacts::archived.eq(true))
                    .execute(conn)?;
                }
            }

            if let Some(server_id) = owned.server_id {
                if success {
                    diesel::update(remote_servers::table.find(server_id))
                        .set((
                            remote_servers::failed.eq(false),
                            remote_servers::archived.eq(false),
                            remote_servers::last_contact.eq(Some(ts)),
                            remote_servers::next_contact.eq(Some(ts)),
                        ))
                        .execute(conn)?;
                } else {
                    let server: Option<(Option<chrono::NaiveDateTime>, chrono::NaiveDateTime)> =
                        remote_servers::table
                            .find(server_id)
                            .select((remote_servers::last_contact, remote_servers::created_at))
                            .first(conn)
                            .optional()?;
                    if let Some((last_contact, created_at)) = server {
                        diesel::update(remote_servers::table.find(server_id))
                            .set((
                                remote_servers::failed.eq(true),
                                remote_servers::last_failure.eq(Some(ts)),
                                remote_servers::next_contact.eq(Some(
                                    next_contact_after_failure(ts, last_contact, created_at),
                                )),
                            ))
                            .execute(conn)?;
                    }
                }
            }

            Ok(Finalized::Applied {
                disposition,
                health: transition,
            })
        })?;

        match &finalized {
            Finalized::Stale => {
                warn!(task_id, worker_id, endpoint = %target.endpoint, "Delivery result dropped: task no longer held");
            }
            Finalized::Applied {
                disposition,
                health,
            } => {
                let label = match disposition {
                    TaskDisposition::Delivered => "delivered",
                    TaskDisposition::Rescheduled { .. } => "rescheduled",
                    TaskDisposition::Rejected => "rejected",
                    TaskDisposition::Exhausted { .. } => "exhausted",
                };
                metrics::counter!("courier_deliveries_total", "protocol" => target.protocol.as_str(), "result" => label)
                    .increment(1);
                debug!(task_id, endpoint = %target.endpoint, result = label, "Delivery finalized");
                if health.changed() {
                    info!(
                        endpoint = %target.endpoint,
                        from = health.from.as_str(),
                        to = health.to.as_str(),
                        "Endpoint health changed"
                    );
                }
            }
        }
        Ok(finalized)
    }
}

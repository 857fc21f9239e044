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

//! Diesel row structs and their conversions to domain models.

use chrono::NaiveDateTime;
use diesel::prelude::*;

use crate::database::schema::{
    delivery_counters, inbox_status, remote_contacts, remote_servers, workerqueue,
};
use crate::database::utc;
use crate::error::StoreError;
use crate::health::{EndpointHealth, HealthInputs};
use crate::models::{
    InboxStatus, Priority, RelayScope, RemoteContact, RemoteServer, Task, TaskOutcome,
};
use crate::protocol::Protocol;

#[derive(Debug, Clone, Queryable, QueryableByName, Selectable)]
#[diesel(table_name = workerqueue)]
pub struct TaskRow {
    pub id: i64,
    pub command: String,
    pub parameters: String,
    pub priority: i32,
    pub created_at: NaiveDateTime,
    pub claimed_by: i64,
    pub executed_at: Option<NaiveDateTime>,
    pub next_attempt_at: NaiveDateTime,
    pub attempt_count: i32,
    pub done: bool,
    pub outcome: Option<String>,
    pub dedup_key: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = workerqueue)]
pub struct NewTaskRow {
    pub command: String,
    pub parameters: String,
    pub priority: i32,
    pub created_at: NaiveDateTime,
    pub claimed_by: i64,
    pub next_attempt_at: NaiveDateTime,
    pub attempt_count: i32,
    pub done: bool,
    pub dedup_key: String,
}

impl TryFrom<TaskRow> for Task {
    type Error = StoreError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let parameters: Vec<serde_json::Value> = serde_json::from_str(&row.parameters)?;
        let outcome = match row.outcome.as_deref() {
            None => None,
            Some(text) => Some(TaskOutcome::from_str(text).ok_or_else(|| {
                StoreError::InvalidRow(format!("task {} has unknown outcome '{}'", row.id, text))
            })?),
        };
        Ok(Task {
            id: row.id,
            command: row.command,
            parameters,
            priority: Priority(row.priority),
            created_at: utc(row.created_at),
            claimed_by: row.claimed_by,
            executed_at: row.executed_at.map(utc),
            next_attempt_at: utc(row.next_attempt_at),
            attempt_count: row.attempt_count,
            done: row.done,
            outcome,
        })
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = remote_servers)]
pub struct ServerRow {
    pub id: i64,
    pub url: String,
    pub normalized_url: String,
    pub protocol: String,
    pub register_policy: i32,
    pub failed: bool,
    pub archived: bool,
    pub last_contact: Option<NaiveDateTime>,
    pub last_failure: Option<NaiveDateTime>,
    pub next_contact: Option<NaiveDateTime>,
    pub relay_subscribe: bool,
    pub relay_scope: String,
    pub relay_tags: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = remote_servers)]
pub struct NewServerRow {
    pub url: String,
    pub normalized_url: String,
    pub protocol: String,
    pub register_policy: i32,
    pub failed: bool,
    pub archived: bool,
    pub relay_subscribe: bool,
    pub relay_scope: String,
    pub relay_tags: String,
    pub created_at: NaiveDateTime,
}

impl TryFrom<ServerRow> for RemoteServer {
    type Error = StoreError;

    fn try_from(row: ServerRow) -> Result<Self, Self::Error> {
        Ok(RemoteServer {
            id: row.id,
            url: row.url,
            normalized_url: row.normalized_url,
            protocol: row.protocol,
            register_policy: row.register_policy,
            failed: row.failed,
            archived: row.archived,
            last_contact: row.last_contact.map(utc),
            last_failure: row.last_failure.map(utc),
            next_contact: row.next_contact.map(utc),
            relay_subscribe: row.relay_subscribe,
            relay_scope: RelayScope::from_str(&row.relay_scope),
            relay_tags: serde_json::from_str(&row.relay_tags)?,
        })
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = remote_contacts)]
pub struct ContactRow {
    pub id: i64,
    pub server_id: i64,
    pub owner_id: i64,
    pub protocol: String,
    pub inbox: String,
    pub shared_inbox: Option<String>,
    pub is_follower: bool,
    pub is_relay: bool,
    pub last_delivered: Option<NaiveDateTime>,
    pub last_failed_delivery: Option<NaiveDateTime>,
    pub archived: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = remote_contacts)]
pub struct NewContactRow {
    pub server_id: i64,
    pub owner_id: i64,
    pub protocol: String,
    pub inbox: String,
    pub shared_inbox: Option<String>,
    pub is_follower: bool,
    pub is_relay: bool,
    pub archived: bool,
    pub created_at: NaiveDateTime,
}

impl TryFrom<ContactRow> for RemoteContact {
    type Error = StoreError;

    fn try_from(row: ContactRow) -> Result<Self, Self::Error> {
        let protocol = Protocol::from_str(&row.protocol).ok_or_else(|| {
            StoreError::InvalidRow(format!(
                "contact {} has unknown protocol '{}'",
                row.id, row.protocol
            ))
        })?;
        Ok(RemoteContact {
            id: row.id,
            server_id: row.server_id,
            owner_id: row.owner_id,
            protocol,
            inbox: row.inbox,
            shared_inbox: row.shared_inbox,
            is_follower: row.is_follower,
            is_relay: row.is_relay,
            last_delivered: row.last_delivered.map(utc),
            last_failed_delivery: row.last_failed_delivery.map(utc),
            archived: row.archived,
        })
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = inbox_status)]
#[diesel(primary_key(url))]
#[diesel(treat_none_as_null = true)]
pub struct InboxStatusRow {
    pub url: String,
    pub created_at: NaiveDateTime,
    pub last_success: Option<NaiveDateTime>,
    pub last_failure: Option<NaiveDateTime>,
    pub previous_attempt: Option<NaiveDateTime>,
    pub failing_since: Option<NaiveDateTime>,
    pub archived: bool,
    pub is_shared: bool,
}

impl InboxStatusRow {
    pub fn fresh(url: &str, is_shared: bool, now: NaiveDateTime) -> Self {
        Self {
            url: url.to_string(),
            created_at: now,
            last_success: None,
            last_failure: None,
            previous_attempt: None,
            failing_since: None,
            archived: false,
            is_shared,
        }
    }

    pub fn health(&self) -> EndpointHealth {
        EndpointHealth {
            inputs: HealthInputs {
                created_at: utc(self.created_at),
                last_success: self.last_success.map(utc),
                last_failure: self.last_failure.map(utc),
                failing_since: self.failing_since.map(utc),
                archived: self.archived,
            },
            previous_attempt: self.previous_attempt.map(utc),
        }
    }

    pub fn apply(&mut self, health: &EndpointHealth) {
        self.last_success = health.inputs.last_success.map(|t| t.naive_utc());
        self.last_failure = health.inputs.last_failure.map(|t| t.naive_utc());
        self.failing_since = health.inputs.failing_since.map(|t| t.naive_utc());
        self.previous_attempt = health.previous_attempt.map(|t| t.naive_utc());
        self.archived = health.inputs.archived;
    }
}

impl From<InboxStatusRow> for InboxStatus {
    fn from(row: InboxStatusRow) -> Self {
        InboxStatus {
            url: row.url,
            created_at: utc(row.created_at),
            last_success: row.last_success.map(utc),
            last_failure: row.last_failure.map(utc),
            previous_attempt: row.previous_attempt.map(utc),
            failing_since: row.failing_since.map(utc),
            archived: row.archived,
            is_shared: row.is_shared,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = delivery_counters)]
pub struct CounterRow {
    pub content_id: String,
    pub protocol: String,
    pub queued: i64,
    pub delivered: i64,
    pub failed: i64,
}

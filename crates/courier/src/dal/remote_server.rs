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

//! Remote server records: one row per normalized server URL.

use chrono::NaiveDateTime;
use diesel::prelude::*;
use tracing::{debug, info};

use super::models::{NewServerRow, ServerRow};
use super::DAL;
use crate::database::now;
use crate::database::schema::remote_servers;
use crate::error::StoreError;
use crate::models::{NewRemoteServer, RemoteServer};

/// When a server that just failed should next be contacted.
///
/// The wait equals the time since the server last answered, clamped to
/// `[1h, 7d]`: a server that was fine a minute ago is retried soon, one that
/// has been dark for weeks is left alone for a week.
pub fn next_contact_after_failure(
    now: NaiveDateTime,
    last_contact: Option<NaiveDateTime>,
    created_at: NaiveDateTime,
) -> NaiveDateTime {
    let silent_for = now - last_contact.unwrap_or(created_at);
    now + silent_for.clamp(chrono::Duration::hours(1), chrono::Duration::days(7))
}

#[derive(Clone)]
pub struct RemoteServerDAL<'a> {
    dal: &'a DAL,
}

impl<'a> RemoteServerDAL<'a> {
    pub fn new(dal: &'a DAL) -> Self {
        Self { dal }
    }

    /// Registers a server, or refreshes the protocol and relay settings of
    /// an existing one. Health fields of an existing server are kept.
    pub async fn upsert(&self, server: &NewRemoteServer) -> Result<RemoteServer, StoreError> {
        let normalized = StoreError::normalized_url(&server.url)?;
        let row = NewServerRow {
            url: server.url.clone(),
            normalized_url: normalized,
            protocol: server.protocol.clone(),
            register_policy: server.register_policy,
            failed: false,
            archived: false,
            relay_subscribe: server.relay_subscribe,
            relay_scope: server.relay_scope.as_str().to_string(),
            relay_tags: serde_json::to_string(&server.relay_tags)?,
            created_at: now(),
        };

        let stored: ServerRow = crate::with_transaction!(self.dal, |conn| {
            let existing: Option<i64> = remote_servers::table
                .filter(remote_servers::normalized_url.eq(&row.normalized_url))
                .select(remote_servers::id)
                .first(conn)
                .optional()?;

            let stored = match existing {
                Some(id) => diesel::update(remote_servers::table.find(id))
                    .set((
                        remote_servers::protocol.eq(&row.protocol),
                        remote_servers::register_policy.eq(row.register_policy),
                        remote_servers::relay_subscribe.eq(row.relay_subscribe),
                        remote_servers::relay_scope.eq(&row.relay_scope),
                        remote_servers::relay_tags.eq(&row.relay_tags),
                    ))
                    .returning(ServerRow::as_returning())
                    .get_result(conn)?,
                None => diesel::insert_into(remote_servers::table)
                    .values(&row)
                    .returning(ServerRow::as_returning())
                    .get_result(conn)?,
            };
            Ok(stored)
        })?;

        debug!(server_id = stored.id, url = %stored.normalized_url, "Server registered");
        RemoteServer::try_from(stored)
    }

    pub async fn get(&self, id: i64) -> Result<Option<RemoteServer>, StoreError> {
        let row: Option<ServerRow> = crate::with_transaction!(self.dal, |conn| {
            Ok(remote_servers::table
                .find(id)
                .select(ServerRow::as_select())
                .first(conn)
                .optional()?)
        })?;
        row.map(RemoteServer::try_from).transpose()
    }

    /// Looks a server up by any spelling of its URL.
    pub async fn get_by_url(&self, url: &str) -> Result<Option<RemoteServer>, StoreError> {
        let normalized = StoreError::normalized_url(url)?;
        let row: Option<ServerRow> = crate::with_transaction!(self.dal, |conn| {
            Ok(remote_servers::table
                .filter(remote_servers::normalized_url.eq(normalized))
                .select(ServerRow::as_select())
                .first(conn)
                .optional()?)
        })?;
        row.map(RemoteServer::try_from).transpose()
    }

    pub async fn get_many(&self, ids: Vec<i64>) -> Result<Vec<RemoteServer>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<ServerRow> = crate::with_transaction!(self.dal, |conn| {
            Ok(remote_servers::table
                .filter(remote_servers::id.eq_any(ids))
                .select(ServerRow::as_select())
                .load(conn)?)
        })?;
        rows.into_iter().map(RemoteServer::try_from).collect()
    }

    /// Servers subscribed as relays.
    pub async fn list_relays(&self) -> Result<Vec<RemoteServer>, StoreError> {
        let rows: Vec<ServerRow> = crate::with_transaction!(self.dal, |conn| {
            Ok(remote_servers::table
                .filter(remote_servers::relay_subscribe.eq(true))
                .order(remote_servers::id.asc())
                .select(ServerRow::as_select())
                .load(conn)?)
        })?;
        rows.into_iter().map(RemoteServer::try_from).collect()
    }

    pub async fn list_archived(&self) -> Result<Vec<RemoteServer>, StoreError> {
        let rows: Vec<ServerRow> = crate::with_transaction!(self.dal, |conn| {
            Ok(remote_servers::table
                .filter(remote_servers::archived.eq(true))
                .order(remote_servers::id.asc())
                .select(ServerRow::as_select())
                .load(conn)?)
        })?;
        rows.into_iter().map(RemoteServer::try_from).collect()
    }

    /// Archives or revives a server by operator request.
    pub async fn set_archived(&self, id: i64, archived: bool) -> Result<bool, StoreError> {
        let updated = crate::with_transaction!(self.dal, |conn| {
            Ok(diesel::update(remote_servers::table.find(id))
                .set(remote_servers::archived.eq(archived))
                .execute(conn)?)
        })?;
        if updated == 1 {
            info!(server_id = id, archived, "Server archival changed");
        }
        Ok(updated == 1)
    }

    /// Makes a backed-off server contactable immediately.
    pub async fn mark_due(&self, id: i64) -> Result<bool, StoreError> {
        let now = now();
        let updated = crate::with_transaction!(self.dal, |conn| {
            Ok(diesel::update(remote_servers::table.find(id))
                .set((
                    remote_servers::next_contact.eq(Some(now)),
                    remote_servers::archived.eq(false),
                ))
                .execute(conn)?)
        })?;
        Ok(updated == 1)
    }
}

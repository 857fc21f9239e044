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

//! Remote contacts: the recipients content is delivered to.

use diesel::prelude::*;

use super::models::{ContactRow, NewContactRow};
use super::DAL;
use crate::database::now;
use crate::database::schema::remote_contacts;
use crate::error::StoreError;
use crate::models::{NewRemoteContact, RemoteContact};

#[derive(Clone)]
pub struct RemoteContactDAL<'a> {
    dal: &'a DAL,
}

impl<'a> RemoteContactDAL<'a> {
    pub fn new(dal: &'a DAL) -> Self {
        Self { dal }
    }

    /// Stores a contact. Inbox URLs are stored normalized, so they compare
    /// equal to the endpoint keys used for health tracking.
    pub async fn create(&self, contact: &NewRemoteContact) -> Result<RemoteContact, StoreError> {
        let inbox = StoreError::normalized_url(&contact.inbox)?;
        let shared_inbox = match contact.shared_inbox.as_deref() {
            Some(url) if !url.trim().is_empty() => Some(StoreError::normalized_url(url)?),
            _ => None,
        };
        let row = NewContactRow {
            server_id: contact.server_id,
            owner_id: contact.owner_id,
            protocol: contact.protocol.as_str().to_string(),
            inbox,
            shared_inbox,
            is_follower: contact.is_follower,
            is_relay: contact.is_relay,
            archived: false,
            created_at: now(),
        };
        let stored: ContactRow = crate::with_transaction!(self.dal, |conn| {
            Ok(diesel::insert_into(remote_contacts::table)
                .values(&row)
                .returning(ContactRow::as_returning())
                .get_result(conn)?)
        })?;
        RemoteContact::try_from(stored)
    }

    pub async fn get(&self, id: i64) -> Result<Option<RemoteContact>, StoreError> {
        let row: Option<ContactRow> = crate::with_transaction!(self.dal, |conn| {
            Ok(remote_contacts::table
                .find(id)
                .select(ContactRow::as_select())
                .first(conn)
                .optional()?)
        })?;
        row.map(RemoteContact::try_from).transpose()
    }

    /// Loads the given contacts, in id order. Unknown ids are skipped.
    pub async fn get_many(&self, ids: Vec<i64>) -> Result<Vec<RemoteContact>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<ContactRow> = crate::with_transaction!(self.dal, |conn| {
            Ok(remote_contacts::table
                .filter(remote_contacts::id.eq_any(ids))
                .order(remote_contacts::id.asc())
                .select(ContactRow::as_select())
                .load(conn)?)
        })?;
        rows.into_iter().map(RemoteContact::try_from).collect()
    }

    /// Contacts following `owner_id`.
    pub async fn followers_of(&self, owner_id: i64) -> Result<Vec<RemoteContact>, StoreError> {
        let rows: Vec<ContactRow> = crate::with_transaction!(self.dal, |conn| {
            Ok(remote_contacts::table
                .filter(remote_contacts::owner_id.eq(owner_id))
                .filter(remote_contacts::is_follower.eq(true))
                .order(remote_contacts::id.asc())
                .select(ContactRow::as_select())
                .load(conn)?)
        })?;
        rows.into_iter().map(RemoteContact::try_from).collect()
    }

    /// Relay actors hosted on any of `server_ids`.
    pub async fn relay_contacts(&self, server_ids: Vec<i64>) -> Result<Vec<RemoteContact>, StoreError> {
        if server_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<ContactRow> = crate::with_transaction!(self.dal, |conn| {
            Ok(remote_contacts::table
                .filter(remote_contacts::server_id.eq_any(server_ids))
                .filter(remote_contacts::is_relay.eq(true))
                .order(remote_contacts::id.asc())
                .select(ContactRow::as_select())
                .load(conn)?)
        })?;
        rows.into_iter().map(RemoteContact::try_from).collect()
    }

    /// Contacts reached through `endpoint`, either personally or through a
    /// shared inbox.
    pub async fn by_endpoint(&self, endpoint: &str) -> Result<Vec<RemoteContact>, StoreError> {
        let endpoint = endpoint.to_string();
        let rows: Vec<ContactRow> = crate::with_transaction!(self.dal, |conn| {
            Ok(remote_contacts::table
                .filter(
                    remote_contacts::inbox
                        .eq(&endpoint)
                        .or(remote_contacts::shared_inbox.eq(&endpoint)),
                )
                .order(remote_contacts::id.asc())
                .select(ContactRow::as_select())
                .load(conn)?)
        })?;
        rows.into_iter().map(RemoteContact::try_from).collect()
    }
}

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

//! Per-endpoint health records.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use tracing::{info, warn};

use super::models::InboxStatusRow;
use super::DAL;
use crate::database::schema::{inbox_status, remote_contacts};
use crate::database::now;
use crate::error::StoreError;
use crate::health::{assess, HealthPolicy, HealthState};
use crate::models::InboxStatus;

#[derive(Clone)]
pub struct InboxStatusDAL<'a> {
    dal: &'a DAL,
}

impl<'a> InboxStatusDAL<'a> {
    pub fn new(dal: &'a DAL) -> Self {
        Self { dal }
    }

    pub async fn get(&self, url: &str) -> Result<Option<InboxStatus>, StoreError> {
        let url = url.to_string();
        let row: Option<InboxStatusRow> = crate::with_transaction!(self.dal, |conn| {
            Ok(inbox_status::table
                .find(&url)
                .select(InboxStatusRow::as_select())
                .first(conn)
                .optional()?)
        })?;
        Ok(row.map(InboxStatus::from))
    }

    /// Returns the record for `url`, creating a healthy one if none exists.
    pub async fn ensure(&self, url: &str, is_shared: bool) -> Result<InboxStatus, StoreError> {
        let fresh = InboxStatusRow::fresh(url, is_shared, now());
        let row: InboxStatusRow = crate::with_transaction!(self.dal, |conn| {
            diesel::insert_into(inbox_status::table)
                .values(&fresh)
                .on_conflict_do_nothing()
                .execute(conn)?;
            Ok(inbox_status::table
                .find(&fresh.url)
                .select(InboxStatusRow::as_select())
                .first(conn)?)
        })?;
        Ok(InboxStatus::from(row))
    }

    /// All endpoint records, ordered by URL.
    pub async fn list(&self) -> Result<Vec<InboxStatus>, StoreError> {
        let rows: Vec<InboxStatusRow> = crate::with_transaction!(self.dal, |conn| {
            Ok(inbox_status::table
                .order(inbox_status::url.asc())
                .select(InboxStatusRow::as_select())
                .load(conn)?)
        })?;
        Ok(rows.into_iter().map(InboxStatus::from).collect())
    }

    pub async fn list_archived(&self) -> Result<Vec<InboxStatus>, StoreError> {
        let rows: Vec<InboxStatusRow> = crate::with_transaction!(self.dal, |conn| {
            Ok(inbox_status::table
                .filter(inbox_status::archived.eq(true))
                .order(inbox_status::url.asc())
                .select(InboxStatusRow::as_select())
                .load(conn)?)
        })?;
        Ok(rows.into_iter().map(InboxStatus::from).collect())
    }

    /// Sets the archived flag of an endpoint and of every contact reached
    /// through it. Streak timestamps are left untouched.
    ///
    /// Returns `false` if the endpoint is unknown.
    pub async fn set_archived(&self, url: &str, archived: bool) -> Result<bool, StoreError> {
        let key = url.to_string();
        let updated = crate::with_transaction!(self.dal, |conn| {
            let updated = diesel::update(inbox_status::table.find(&key))
                .set(inbox_status::archived.eq(archived))
                .execute(conn)?;
            if updated == 1 {
                diesel::update(
                    remote_contacts::table.filter(
                        remote_contacts::inbox
                            .eq(&key)
                            .or(remote_contacts::shared_inbox.eq(&key)),
                    ),
                )
                .set(remote_contacts::archived.eq(archived))
                .execute(conn)?;
            }
            Ok(updated)
        })?;

        if updated == 1 {
            info!(url = %url, archived, "Endpoint archival changed by operator");
        }
        Ok(updated == 1)
    }

    /// Archives endpoints whose failure streak crossed the threshold without
    /// any new delivery attempt noticing. Returns the archived URLs.
    pub async fn sweep(
        &self,
        now: DateTime<Utc>,
        policy: &HealthPolicy,
    ) -> Result<Vec<String>, StoreError> {
        let policy = policy.clone();
        let archived: Vec<String> = crate::with_transaction!(self.dal, |conn| {
            let failing: Vec<InboxStatusRow> = inbox_status::table
                .filter(inbox_status::archived.eq(false))
                .filter(inbox_status::failing_since.is_not_null())
                .select(InboxStatusRow::as_select())
                .load(conn)?;

            let mut archived = Vec::new();
            for row in failing {
                let inputs = row.health().inputs;
                if assess(&inputs, now, &policy) != HealthState::Archived {
                    continue;
                }
                diesel::update(inbox_status::table.find(&row.url))
                    .set(inbox_status::archived.eq(true))
                    .execute(conn)?;
                diesel::update(
                    remote_contacts::table.filter(
                        remote_contacts::inbox
                            .eq(&row.url)
                            .or(remote_contacts::shared_inbox.eq(&row.url)),
                    ),
                )
                .set(remote_contacts::archived.eq(true))
                .execute(conn)?;
                archived.push(row.url);
            }
            Ok(archived)
        })?;

        for url in &archived {
            warn!(url = %url, "Endpoint archived after a silent failure streak");
        }
        Ok(archived)
    }
}

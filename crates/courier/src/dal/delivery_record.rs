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

//! Per-content delivery counters, one row per (content, protocol).

use diesel::prelude::*;
use tracing::warn;

use super::models::CounterRow;
use super::DAL;
use crate::database::schema::delivery_counters;
use crate::error::StoreError;
use crate::models::{DeliveryRecord, ProtocolCounters};
use crate::protocol::Protocol;

#[derive(Clone)]
pub struct DeliveryRecordDAL<'a> {
    dal: &'a DAL,
}

impl<'a> DeliveryRecordDAL<'a> {
    pub fn new(dal: &'a DAL) -> Self {
        Self { dal }
    }

    /// Adds `count` to the queued counter of `content_id` for `protocol`.
    pub async fn add_queued(
        &self,
        content_id: &str,
        protocol: Protocol,
        count: i64,
    ) -> Result<(), StoreError> {
        if count <= 0 {
            return Ok(());
        }
        let row = CounterRow {
            content_id: content_id.to_string(),
            protocol: protocol.as_str().to_string(),
            queued: count,
            delivered: 0,
            failed: 0,
        };
        crate::with_transaction!(self.dal, |conn| {
            diesel::insert_into(delivery_counters::table)
                .values(&row)
                .on_conflict((delivery_counters::content_id, delivery_counters::protocol))
                .do_update()
                .set(delivery_counters::queued.eq(delivery_counters::queued + count))
                .execute(conn)?;
            Ok(())
        })
    }

    /// Counters of one content item. Items never queued get an empty record.
    pub async fn get(&self, content_id: &str) -> Result<DeliveryRecord, StoreError> {
        let key = content_id.to_string();
        let rows: Vec<CounterRow> = crate::with_transaction!(self.dal, |conn| {
            Ok(delivery_counters::table
                .filter(delivery_counters::content_id.eq(&key))
                .select(CounterRow::as_select())
                .load(conn)?)
        })?;

        let mut record = DeliveryRecord::new(content_id);
        for row in rows {
            let Some(protocol) = Protocol::from_str(&row.protocol) else {
                warn!(content_id, protocol = %row.protocol, "Ignoring counters for unknown protocol");
                continue;
            };
            record.absorb(
                protocol,
                ProtocolCounters {
                    queued: row.queued,
                    delivered: row.delivered,
                    failed: row.failed,
                },
            );
        }
        Ok(record)
    }
}

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

//! Per-content delivery accounting.

use std::collections::BTreeMap;

use crate::protocol::Protocol;

/// Counters for one protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProtocolCounters {
    pub queued: i64,
    pub delivered: i64,
    pub failed: i64,
}

/// Delivery progress of a content item across all protocols.
///
/// `queued = delivered + failed + pending` holds at all times; counters only
/// grow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryRecord {
    pub content_id: String,
    pub queued: i64,
    pub delivered: i64,
    pub failed: i64,
    pub by_protocol: BTreeMap<Protocol, ProtocolCounters>,
}

impl DeliveryRecord {
    pub fn new(content_id: impl Into<String>) -> Self {
        Self {
            content_id: content_id.into(),
            ..Default::default()
        }
    }

    /// Adds one protocol's counters to the totals.
    pub fn absorb(&mut self, protocol: Protocol, counters: ProtocolCounters) {
        self.queued += counters.queued;
        self.delivered += counters.delivered;
        self.failed += counters.failed;
        let entry = self.by_protocol.entry(protocol).or_default();
        entry.queued += counters.queued;
        entry.delivered += counters.delivered;
        entry.failed += counters.failed;
    }

    pub fn pending(&self) -> i64 {
        self.queued - self.delivered - self.failed
    }

    pub fn protocol(&self, protocol: Protocol) -> ProtocolCounters {
        self.by_protocol.get(&protocol).copied().unwrap_or_default()
    }
}

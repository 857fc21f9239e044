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

//! Delivery health of a physical endpoint.

use chrono::{DateTime, Utc};

use crate::health::{self, HealthInputs, HealthPolicy, HealthState};

/// Per-endpoint reachability history, keyed by URL.
///
/// Several contacts may share one inbox; the status belongs to the URL, not
/// to any of them.
#[derive(Debug, Clone, PartialEq)]
pub struct InboxStatus {
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    /// An earlier failure of the current streak, at least a day before the
    /// latest one.
    pub previous_attempt: Option<DateTime<Utc>>,
    /// First failure of the current streak.
    pub failing_since: Option<DateTime<Utc>>,
    pub archived: bool,
    pub is_shared: bool,
}

impl InboxStatus {
    pub fn health(&self, now: DateTime<Utc>, policy: &HealthPolicy) -> HealthState {
        health::assess(&self.inputs(), now, policy)
    }

    pub(crate) fn inputs(&self) -> HealthInputs {
        HealthInputs {
            created_at: self.created_at,
            last_success: self.last_success,
            last_failure: self.last_failure,
            failing_since: self.failing_since,
            archived: self.archived,
        }
    }
}

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

//! Endpoint health state machine.
//!
//! Health is never stored as a state column. It is recomputed from the
//! endpoint's timestamps every time it is needed, so the only writes are
//! "a delivery succeeded at t" and "a delivery failed at t".
//!
//! ```text
//!   Healthy --failure--> Degraded --streak >= archival_days--> Archived
//!      ^                    |                                     |
//!      +------success-------+-------------success-----------------+
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Derived health of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Archived,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Healthy => "healthy",
            HealthState::Degraded => "degraded",
            HealthState::Archived => "archived",
        }
    }
}

/// Thresholds for health derivation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthPolicy {
    /// Days a failure streak must span before the endpoint is archived.
    pub archival_days: i64,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self { archival_days: 32 }
    }
}

impl HealthPolicy {
    pub fn new(archival_days: i64) -> Self {
        Self { archival_days }
    }

    pub fn archival_threshold(&self) -> Duration {
        Duration::days(self.archival_days)
    }
}

/// The stored timestamps health is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthInputs {
    pub created_at: DateTime<Utc>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    /// First failure of the current streak.
    pub failing_since: Option<DateTime<Utc>>,
    pub archived: bool,
}

impl HealthInputs {
    /// Whether the most recent outcome was a failure.
    pub fn is_failing(&self) -> bool {
        match (self.last_failure, self.last_success) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(failure), Some(success)) => failure > success,
        }
    }

    /// Start of the current failure streak, if failing.
    pub fn streak_start(&self) -> Option<DateTime<Utc>> {
        if !self.is_failing() {
            return None;
        }
        self.failing_since
            .or(self.last_failure)
            .or(self.last_success)
            .or(Some(self.created_at))
    }
}

/// Derives health from stored timestamps.
///
/// An archived flag is sticky until a success clears it. Otherwise a failing
/// endpoint is archived once its streak spans `archival_days` whole days,
/// and degraded before that.
pub fn assess(inputs: &HealthInputs, now: DateTime<Utc>, policy: &HealthPolicy) -> HealthState {
    if inputs.archived {
        return HealthState::Archived;
    }
    match inputs.streak_start() {
        None => HealthState::Healthy,
        Some(start) if now - start >= policy.archival_threshold() => HealthState::Archived,
        Some(_) => HealthState::Degraded,
    }
}

/// A state change caused by recording one outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: HealthState,
    pub to: HealthState,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }

    /// Whether this outcome brought a failing endpoint back.
    pub fn recovered(&self) -> bool {
        self.from != HealthState::Healthy && self.to == HealthState::Healthy
    }
}

/// Mutable health record for one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointHealth {
    pub inputs: HealthInputs,
    pub previous_attempt: Option<DateTime<Utc>>,
}

impl EndpointHealth {
    pub fn new(created_at: DateTime<Utc>) -> Self {
        Self {
            inputs: HealthInputs {
                created_at,
                last_success: None,
                last_failure: None,
                failing_since: None,
                archived: false,
            },
            previous_attempt: None,
        }
    }

    pub fn state(&self, now: DateTime<Utc>, policy: &HealthPolicy) -> HealthState {
        assess(&self.inputs, now, policy)
    }

    /// Records a successful delivery. Clears the streak and any archival.
    pub fn record_success(&mut self, now: DateTime<Utc>, policy: &HealthPolicy) -> Transition {
        let from = self.state(now, policy);
        self.advance_previous();
        self.inputs.last_success = Some(now);
        self.inputs.failing_since = None;
        self.inputs.archived = false;
        Transition {
            from,
            to: self.state(now, policy),
        }
    }

    /// Records a failed delivery, starting a streak if none is running and
    /// archiving once the streak crosses the threshold.
    pub fn record_failure(&mut self, now: DateTime<Utc>, policy: &HealthPolicy) -> Transition {
        let from = self.state(now, policy);
        if !self.inputs.is_failing() {
            self.inputs.failing_since = Some(now);
        }
        self.advance_previous();
        self.inputs.last_failure = Some(now);
        let to = self.state(now, policy);
        if to == HealthState::Archived {
            self.inputs.archived = true;
        }
        Transition { from, to }
    }

    /// `previous_attempt` keeps a coarse trail: it only moves to the last
    /// outcome when that outcome is at least a day newer than it.
    fn advance_previous(&mut self) {
        let last = match (self.inputs.last_success, self.inputs.last_failure) {
            (Some(s), Some(f)) => Some(s.max(f)),
            (s, f) => s.or(f),
        };
        let Some(last) = last else {
            return;
        };
        let due = self
            .previous_attempt
            .map_or(true, |previous| last - previous >= Duration::days(1));
        if due {
            self.previous_attempt = Some(last);
        }
    }
}

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

//! Back-off and attempt ceiling for deferred tasks.

use std::time::Duration;

use rand::Rng;

use crate::models::Priority;

/// Decision for a task that failed transiently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after `delay` at `priority`, as attempt number `attempt`.
    Retry {
        attempt: i32,
        delay: Duration,
        priority: Priority,
    },
    /// The ceiling was reached; finish the task as a failure.
    GiveUp { attempts: i32 },
}

/// Polynomial back-off with an attempt ceiling.
///
/// The delay before retry `n` is `(n + 2)^4` time units plus up to `30 * n`
/// units of jitter. The polynomial step always outgrows the jitter range, so
/// delays never shrink from one attempt to the next.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: i32,
    unit: Duration,
    jitter: bool,
    demote: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 15,
            unit: Duration::from_secs(1),
            jitter: true,
            demote: true,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: i32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Scales every delay; `Duration::ZERO` makes retries immediately due.
    pub fn with_unit(mut self, unit: Duration) -> Self {
        self.unit = unit;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_demotion(mut self, demote: bool) -> Self {
        self.demote = demote;
        self
    }

    pub fn max_attempts(&self) -> i32 {
        self.max_attempts
    }

    /// Delay before retry number `attempt` (1-based), without jitter.
    pub fn base_delay(&self, attempt: i32) -> Duration {
        let n = attempt.max(1) as u32 + 2;
        self.unit.saturating_mul(n.saturating_pow(4))
    }

    /// Delay before retry number `attempt`, with jitter if enabled.
    pub fn delay(&self, attempt: i32) -> Duration {
        let base = self.base_delay(attempt);
        if !self.jitter {
            return base;
        }
        let spread = 30 * attempt.max(1) as u32;
        let extra = rand::thread_rng().gen_range(0..=spread);
        base.saturating_add(self.unit.saturating_mul(extra))
    }

    /// Lowers the priority of a task that keeps failing so it stops
    /// competing with fresh work.
    pub fn demoted(&self, priority: Priority, attempt: i32) -> Priority {
        if !self.demote {
            return priority;
        }
        if priority < Priority::MEDIUM && attempt > 3 {
            Priority::MEDIUM
        } else if priority < Priority::LOW && attempt > 6 {
            Priority::LOW
        } else if priority < Priority::NEGLIGIBLE && attempt > 8 {
            Priority::NEGLIGIBLE
        } else {
            priority
        }
    }

    /// What to do with a task that has failed `attempts_so_far` times and
    /// just failed again.
    pub fn next(&self, attempts_so_far: i32, priority: Priority) -> RetryDecision {
        if attempts_so_far >= self.max_attempts {
            return RetryDecision::GiveUp {
                attempts: attempts_so_far,
            };
        }
        let attempt = attempts_so_far + 1;
        RetryDecision::Retry {
            attempt,
            delay: self.delay(attempt),
            priority: self.demoted(priority, attempt),
        }
    }
}

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

//! The unit of deferred work stored in `workerqueue`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::command::Command;
use crate::error::CommandError;

/// Task priority. Lower values are more urgent.
///
/// The store accepts any small integer; the named tiers are the ones the
/// engine itself produces and the ones priority demotion moves between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub i32);

impl Priority {
    pub const CRITICAL: Priority = Priority(0);
    pub const HIGH: Priority = Priority(1);
    pub const MEDIUM: Priority = Priority(2);
    pub const LOW: Priority = Priority(3);
    pub const NEGLIGIBLE: Priority = Priority(4);

    /// Named tiers, most urgent first.
    pub const TIERS: [Priority; 5] = [
        Priority::CRITICAL,
        Priority::HIGH,
        Priority::MEDIUM,
        Priority::LOW,
        Priority::NEGLIGIBLE,
    ];

    pub fn value(self) -> i32 {
        self.0
    }

    /// Parses a tier name or a bare integer. Unknown input falls back to
    /// `MEDIUM`.
    pub fn parse(input: &str) -> Priority {
        match input.trim().to_ascii_lowercase().as_str() {
            "critical" => Priority::CRITICAL,
            "high" => Priority::HIGH,
            "medium" => Priority::MEDIUM,
            "low" => Priority::LOW,
            "negligible" => Priority::NEGLIGIBLE,
            other => match other.parse::<i32>() {
                Ok(value) if value >= 0 => Priority(value),
                _ => {
                    warn!(input, "Unknown priority, using medium");
                    Priority::MEDIUM
                }
            },
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::MEDIUM
    }
}

impl From<i32> for Priority {
    fn from(value: i32) -> Self {
        Priority(value)
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Priority::CRITICAL => write!(f, "critical"),
            Priority::HIGH => write!(f, "high"),
            Priority::MEDIUM => write!(f, "medium"),
            Priority::LOW => write!(f, "low"),
            Priority::NEGLIGIBLE => write!(f, "negligible"),
            Priority(other) => write!(f, "{}", other),
        }
    }
}

/// How a task reached `done = true`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Success,
    PermanentFailure,
    AttemptsExhausted,
    Cancelled,
}

impl TaskOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskOutcome::Success => "success",
            TaskOutcome::PermanentFailure => "permanent_failure",
            TaskOutcome::AttemptsExhausted => "attempts_exhausted",
            TaskOutcome::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "success" => Some(TaskOutcome::Success),
            "permanent_failure" => Some(TaskOutcome::PermanentFailure),
            "attempts_exhausted" => Some(TaskOutcome::AttemptsExhausted),
            "cancelled" => Some(TaskOutcome::Cancelled),
            _ => None,
        }
    }

    /// Whether this outcome ends the task without the work having happened.
    pub fn is_failure(&self) -> bool {
        !matches!(self, TaskOutcome::Success)
    }
}

/// Observable lifecycle position of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Waiting to be claimed, never attempted.
    Pending,
    /// Waiting to be claimed after at least one failed attempt.
    Deferred,
    /// Held by a worker.
    Claimed,
    /// Finished; immutable until purged.
    Done(TaskOutcome),
}

/// A unit of deferred, retryable work.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: i64,
    pub command: String,
    pub parameters: Vec<Value>,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    /// Worker holding the claim; `0` when unclaimed.
    pub claimed_by: i64,
    /// Claim time while claimed, otherwise the last execution time.
    pub executed_at: Option<DateTime<Utc>>,
    pub next_attempt_at: DateTime<Utc>,
    pub attempt_count: i32,
    pub done: bool,
    pub outcome: Option<TaskOutcome>,
}

impl Task {
    /// Decodes the stored command name and parameters.
    pub fn decode(&self) -> Result<Command, CommandError> {
        Command::from_parts(&self.command, &self.parameters)
    }

    pub fn state(&self) -> TaskState {
        if self.done {
            TaskState::Done(self.outcome.unwrap_or(TaskOutcome::Success))
        } else if self.claimed_by != 0 {
            TaskState::Claimed
        } else if self.attempt_count > 0 {
            TaskState::Deferred
        } else {
            TaskState::Pending
        }
    }
}

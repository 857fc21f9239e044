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

//! Periodic upkeep run from the scheduler loop.
//!
//! Stale claims are released inline. Health sweeps and queue cleanup are
//! queued as ordinary low-priority tasks, so with several scheduler
//! processes the dedup key keeps one of each pending at a time.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::command::Command;
use crate::dal::DAL;
use crate::error::StoreError;
use crate::models::Priority;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub released_claims: usize,
    pub queued_jobs: usize,
}

pub struct Maintenance {
    dal: DAL,
    claim_timeout: Duration,
    interval: Duration,
    last_run: Mutex<Option<Instant>>,
}

impl Maintenance {
    pub fn new(dal: DAL, claim_timeout: Duration, interval: Duration) -> Self {
        Self {
            dal,
            claim_timeout,
            interval,
            last_run: Mutex::new(None),
        }
    }

    fn is_due(&self) -> bool {
        let mut last_run = self.last_run.lock();
        let now = Instant::now();
        match *last_run {
            Some(previous) if now.duration_since(previous) < self.interval => false,
            _ => {
                *last_run = Some(now);
                true
            }
        }
    }

    /// Runs upkeep if the interval has passed since the last run.
    pub async fn run_if_due(&self) -> Option<MaintenanceReport> {
        if !self.is_due() {
            return None;
        }
        match self.run_once().await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(error = %e, "Maintenance run failed");
                None
            }
        }
    }

    pub async fn run_once(&self) -> Result<MaintenanceReport, StoreError> {
        let queue = self.dal.task_queue();
        let released_claims = queue.abandon_stale_claims(self.claim_timeout).await?;

        let mut queued_jobs = 0;
        for command in [Command::HealthSweep, Command::QueueCleanup] {
            if queue.submit(&command, Priority::NEGLIGIBLE, None).await?.inserted {
                queued_jobs += 1;
            }
        }

        debug!(released_claims, queued_jobs, "Maintenance run complete");
        Ok(MaintenanceReport {
            released_claims,
            queued_jobs,
        })
    }
}

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

//! Executes one claimed task.
//!
//! Delivery tasks go through the protocol adapter registered for their
//! protocol; the outcome is recorded through the Endpoint Registry in one
//! transaction. Maintenance commands run inline and complete directly.

use std::time::Duration;

use tracing::{debug, error, warn};

use crate::command::{Command, DeliveryTarget};
use crate::dal::{Finalized, DAL};
use crate::error::SchedulerError;
use crate::models::{Task, TaskOutcome};
use crate::protocol::{AdapterRegistry, DeliveryOutcome, DeliveryPayload};
use crate::registry::EndpointRegistry;

/// What executing a task did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Execution {
    Delivery(Finalized),
    /// A maintenance command ran and touched `affected` rows.
    Maintenance { affected: usize },
    /// The stored command could not be decoded; the task was finished as a
    /// permanent failure.
    Malformed,
    /// The task was finished or reclaimed before it ran.
    Skipped,
}

#[derive(Clone)]
pub struct TaskExecutor {
    dal: DAL,
    adapters: AdapterRegistry,
    registry: EndpointRegistry,
    task_timeout: Duration,
    retention: Duration,
}

impl TaskExecutor {
    pub fn new(
        dal: DAL,
        adapters: AdapterRegistry,
        registry: EndpointRegistry,
        task_timeout: Duration,
        retention: Duration,
    ) -> Self {
        Self {
            dal,
            adapters,
            registry,
            task_timeout,
            retention,
        }
    }

    pub fn registry(&self) -> &EndpointRegistry {
        &self.registry
    }

    pub fn adapters(&self) -> &AdapterRegistry {
        &self.adapters
    }

    /// Runs `task`, which `worker_id` must have claimed.
    pub async fn execute(&self, task: &Task, worker_id: i64) -> Result<Execution, SchedulerError> {
        let command = match task.decode() {
            Ok(command) => command,
            Err(e) => {
                error!(task_id = task.id, command = %task.command, error = %e, "Dropping undecodable task");
                self.dal
                    .task_queue()
                    .complete(task.id, worker_id, TaskOutcome::PermanentFailure)
                    .await?;
                return Ok(Execution::Malformed);
            }
        };

        match command {
            Command::Deliver(target) => self.deliver(task, worker_id, &target).await,
            Command::HealthSweep => {
                let archived = self.registry.health_sweep().await?;
                self.finish_maintenance(task, worker_id, archived.len()).await
            }
            Command::QueueCleanup => {
                let purged = self.dal.task_queue().purge_done(self.retention).await?;
                self.finish_maintenance(task, worker_id, purged).await
            }
        }
    }

    async fn deliver(
        &self,
        task: &Task,
        worker_id: i64,
        target: &DeliveryTarget,
    ) -> Result<Execution, SchedulerError> {
        // A task cancelled after the claim must not be sent.
        if !self.dal.task_queue().is_held_by(task.id, worker_id).await? {
            debug!(task_id = task.id, "Task no longer held, not delivering");
            return Ok(Execution::Skipped);
        }

        let outcome = match self.adapters.get(target.protocol) {
            Some(adapter) => {
                let payload = DeliveryPayload::new(
                    &target.content_id,
                    target.protocol,
                    &target.endpoint,
                    task.attempt_count,
                );
                match tokio::time::timeout(self.task_timeout, adapter.deliver(&target.endpoint, &payload))
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        warn!(task_id = task.id, endpoint = %target.endpoint, "Delivery timed out");
                        DeliveryOutcome::TransientFailure(format!(
                            "timed out after {:?}",
                            self.task_timeout
                        ))
                    }
                }
            }
            None => {
                // Retried: the adapter may be registered once the deployment is fixed.
                let e = SchedulerError::MissingAdapter(target.protocol.to_string());
                error!(task_id = task.id, error = %e, "Cannot deliver");
                DeliveryOutcome::TransientFailure(e.to_string())
            }
        };

        match &outcome {
            DeliveryOutcome::Success => {}
            DeliveryOutcome::TransientFailure(reason) | DeliveryOutcome::PermanentFailure(reason) => {
                debug!(task_id = task.id, endpoint = %target.endpoint, reason = %reason, "Delivery failed");
            }
        }

        let finalized = self
            .registry
            .record_delivery(task.id, worker_id, target, &outcome)
            .await?;
        Ok(Execution::Delivery(finalized))
    }

    async fn finish_maintenance(
        &self,
        task: &Task,
        worker_id: i64,
        affected: usize,
    ) -> Result<Execution, SchedulerError> {
        self.dal
            .task_queue()
            .complete(task.id, worker_id, TaskOutcome::Success)
            .await?;
        Ok(Execution::Maintenance { affected })
    }
}

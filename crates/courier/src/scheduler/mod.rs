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

//! Task Scheduler: claims tasks and runs them under concurrency limits.
//!
//! Each pass of the loop runs maintenance when due, checks the throttle,
//! claims as many tasks as there are free workers and spawns them. With no
//! work claimed it waits on the [`WorkSignal`]. Several scheduler processes
//! may share one task store; the atomic claim is their only coordination.
//!
//! ```rust,ignore
//! let scheduler = Arc::new(TaskScheduler::new(dal, config, adapters, signal));
//! let handle = tokio::spawn({
//!     let scheduler = scheduler.clone();
//!     async move { scheduler.run().await }
//! });
//! // ...
//! scheduler.shutdown();
//! handle.await??;
//! ```

pub mod executor;
pub mod maintenance;
pub mod throttle;

pub use executor::{Execution, TaskExecutor};
pub use maintenance::{Maintenance, MaintenanceReport};
pub use throttle::{LoadProbe, ProcLoadAverage, StaticLoad, Throttle};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

use crate::config::CourierConfig;
use crate::dal::{ClaimRequest, DAL};
use crate::error::SchedulerError;
use crate::models::Task;
use crate::protocol::AdapterRegistry;
use crate::registry::EndpointRegistry;
use crate::retry::RetryPolicy;
use crate::signal::WorkSignal;

/// Longest wait for running tasks to finish on shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Pause after a failed claim before trying again.
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// A worker id unique to this scheduler: the process id in the high bits,
/// random low bits to tell apart schedulers within one process and reused
/// process ids. Never 0, which marks unclaimed tasks.
fn new_worker_id() -> i64 {
    let pid = i64::from(std::process::id());
    let suffix: i64 = rand::thread_rng().gen_range(1..(1 << 20));
    (pid << 20) | suffix
}

pub struct TaskScheduler {
    dal: DAL,
    config: CourierConfig,
    executor: Arc<TaskExecutor>,
    signal: Arc<dyn WorkSignal>,
    throttle: Throttle,
    load: Arc<dyn LoadProbe>,
    maintenance: Maintenance,
    workers: Arc<Semaphore>,
    fast_lane: Arc<Semaphore>,
    worker_id: i64,
    shutdown: AtomicBool,
}

impl TaskScheduler {
    pub fn new(
        dal: DAL,
        config: CourierConfig,
        adapters: AdapterRegistry,
        signal: Arc<dyn WorkSignal>,
    ) -> Self {
        let registry = EndpointRegistry::new(
            dal.clone(),
            config.health_policy(),
            config.retry_policy(),
        );
        let executor = TaskExecutor::new(
            dal.clone(),
            adapters,
            registry,
            config.task_timeout(),
            config.retention(),
        );
        let maintenance = Maintenance::new(
            dal.clone(),
            config.claim_timeout(),
            config.maintenance_interval(),
        );
        Self {
            throttle: Throttle::from_config(&config),
            workers: Arc::new(Semaphore::new(config.max_workers())),
            fast_lane: Arc::new(Semaphore::new(1)),
            worker_id: new_worker_id(),
            executor: Arc::new(executor),
            load: Arc::new(ProcLoadAverage),
            shutdown: AtomicBool::new(false),
            maintenance,
            signal,
            config,
            dal,
        }
    }

    /// Replaces the retry policy derived from the configuration.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        let current = self.executor.as_ref().clone();
        let registry = EndpointRegistry::new(
            self.dal.clone(),
            current.registry().health_policy().clone(),
            retry,
        );
        self.executor = Arc::new(TaskExecutor::new(
            self.dal.clone(),
            current.adapters().clone(),
            registry,
            self.config.task_timeout(),
            self.config.retention(),
        ));
        self
    }

    pub fn with_load_probe(mut self, probe: Arc<dyn LoadProbe>) -> Self {
        self.load = probe;
        self
    }

    pub fn worker_id(&self) -> i64 {
        self.worker_id
    }

    /// Tasks currently executing, fast lane included.
    pub fn busy(&self) -> usize {
        let workers = self.config.max_workers() - self.workers.available_permits();
        workers + (1 - self.fast_lane.available_permits())
    }

    /// Runs until [`shutdown`](Self::shutdown), then waits for running
    /// tasks to finish.
    pub async fn run(&self) -> Result<(), SchedulerError> {
        info!(
            worker_id = self.worker_id,
            max_workers = self.config.max_workers(),
            "Task scheduler started"
        );

        while !self.shutdown.load(Ordering::SeqCst) {
            self.maintenance.run_if_due().await;

            match self.tick().await {
                Ok(0) => self.signal.wait_for_work().await,
                Ok(claimed) => debug!(claimed, "Dispatched claimed tasks"),
                Err(e) => {
                    error!(error = %e, "Claim failed");
                    tokio::time::sleep(ERROR_BACKOFF).await;
                }
            }
        }

        info!(worker_id = self.worker_id, "Task scheduler stopping, draining workers");
        if tokio::time::timeout(DRAIN_TIMEOUT, self.wait_idle()).await.is_err() {
            warn!(busy = self.busy(), "Shutdown timed out with tasks still running");
        }
        Ok(())
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.signal.shutdown();
    }

    /// One claim pass. Returns the number of tasks started.
    pub async fn tick(&self) -> Result<usize, SchedulerError> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(SchedulerError::ShuttingDown);
        }

        let usage = self.dal.database().usage();
        if self.throttle.connections_saturated(usage) {
            debug!(in_use = usage.in_use, max = usage.max_size, "Connection pressure, not claiming");
            return Ok(0);
        }

        let load = self.load.load_average();
        let limit = self.throttle.worker_limit(load);
        let busy = self.config.max_workers() - self.workers.available_permits();
        metrics::gauge!("courier_workers_busy").set(busy as f64);

        let free = limit.saturating_sub(busy);
        if free > 0 {
            let mut permits = Vec::with_capacity(free);
            for _ in 0..free {
                match self.workers.clone().try_acquire_owned() {
                    Ok(permit) => permits.push(permit),
                    Err(_) => break,
                }
            }
            let request = ClaimRequest::new(permits.len(), self.worker_id)
                .with_claim_timeout(self.config.claim_timeout());
            let tasks = self.dal.task_queue().claim_with(request).await?;
            let started = tasks.len();
            for (task, permit) in tasks.into_iter().zip(permits) {
                self.spawn(task, permit);
            }
            return Ok(started);
        }

        if load.is_some() && limit == 0 {
            debug!(load = ?load, "Load above maximum, not claiming");
        }
        self.try_fast_lane(busy, limit).await
    }

    async fn try_fast_lane(&self, busy: usize, limit: usize) -> Result<usize, SchedulerError> {
        let Ok(permit) = self.fast_lane.clone().try_acquire_owned() else {
            return Ok(0);
        };
        let queue = self.dal.task_queue();
        let Some(tier) = queue.highest_pending_priority().await? else {
            return Ok(0);
        };
        let running = queue.claimed_with_priority_at_most(tier).await?;
        let Some(tier) = self.throttle.fast_lane(busy, limit, Some(tier), running) else {
            return Ok(0);
        };

        let request = ClaimRequest::new(1, self.worker_id)
            .with_claim_timeout(self.config.claim_timeout())
            .at_or_above(tier);
        let Some(task) = queue.claim_with(request).await?.into_iter().next() else {
            return Ok(0);
        };
        info!(task_id = task.id, priority = %tier, "Fast lane picked up urgent task");
        self.spawn(task, permit);
        Ok(1)
    }

    fn spawn(&self, task: Task, permit: OwnedSemaphorePermit) {
        let executor = self.executor.clone();
        let worker_id = self.worker_id;
        let cooldown = self.config.worker_cooldown();
        tokio::spawn(async move {
            let _permit = permit;
            match executor.execute(&task, worker_id).await {
                Ok(execution) => debug!(task_id = task.id, ?execution, "Task executed"),
                Err(e) => error!(task_id = task.id, error = %e, "Task execution failed"),
            }
            if !cooldown.is_zero() {
                tokio::time::sleep(cooldown).await;
            }
        });
    }

    /// Waits until no task is executing.
    pub async fn wait_idle(&self) {
        let workers = self.config.max_workers() as u32;
        if let Ok(all) = self.workers.acquire_many(workers).await {
            drop(all);
        }
        if let Ok(lane) = self.fast_lane.acquire().await {
            drop(lane);
        }
    }
}

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

//! # Courier
//!
//! Courier is the federated delivery and background-task engine. It takes a
//! locally authored or received content item, resolves the remote endpoints
//! that should see it, and delivers it through pluggable protocol adapters
//! while tracking the health of every endpoint it talks to.
//!
//! ## Components
//!
//! - [`dal::TaskQueueDAL`]: the durable task store (`workerqueue`) with atomic
//!   batch claiming, back-off and stale-claim recovery.
//! - [`scheduler::TaskScheduler`]: claims tasks under worker and load limits and
//!   runs their command handlers.
//! - [`dispatcher::DeliveryDispatcher`]: fans content out to deduplicated
//!   physical endpoints.
//! - [`registry::EndpointRegistry`]: records delivery outcomes and derives
//!   endpoint health (`Healthy`, `Degraded`, `Archived`).
//! - [`protocol::ProtocolAdapter`]: the contract each federation protocol
//!   implements.
//! - [`signal::WorkSignal`]: wakes idle schedulers when producers enqueue work.
//!
//! ## Example
//!
//! ```rust,ignore
//! use courier::{signal::create_work_signal, CourierConfig, Database, TaskScheduler, DAL};
//!
//! let database = Database::try_new("sqlite:///var/lib/courier/queue.db", 4)?;
//! database.run_migrations().await?;
//! let dal = DAL::new(database);
//!
//! let config = CourierConfig::builder().max_workers(8).build()?;
//! let signal = create_work_signal(&dal, &config).await?;
//! let scheduler = TaskScheduler::new(dal, config, adapters, signal);
//! scheduler.run().await?;
//! ```

pub mod command;
pub mod config;
pub mod dal;
pub mod database;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod models;
pub mod protocol;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod signal;

pub use command::Command;
pub use config::{ConfigLoader, CourierConfig, CourierConfigBuilder};
pub use dal::DAL;
pub use database::{BackendType, Database};
pub use dispatcher::{Audience, ContentItem, DeliveryDispatcher, FanOutReport};
pub use error::{CommandError, ConfigError, DispatchError, SchedulerError, StoreError};
pub use health::{HealthPolicy, HealthState};
pub use models::{Priority, Task, TaskOutcome};
pub use protocol::{AdapterRegistry, DeliveryOutcome, DeliveryPayload, Protocol, ProtocolAdapter};
pub use registry::{EndpointRegistry, RegistrySummary};
pub use retry::RetryPolicy;
pub use scheduler::TaskScheduler;
pub use signal::{IpcSignal, WorkSignal};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initializes the global tracing subscriber.
///
/// `level` overrides `RUST_LOG` when given. Calling this more than once is
/// harmless; later calls leave the first subscriber in place.
pub fn init_logging(level: Option<tracing::Level>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level.as_str().to_lowercase()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let _ = tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .try_init();
}

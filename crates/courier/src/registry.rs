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

//! Endpoint Registry: what the system knows about remote endpoints.
//!
//! Delivery outcomes flow in through [`EndpointRegistry::record_delivery`];
//! operators read and override endpoint state through the remaining
//! methods. Health itself is computed by [`crate::health`] from the stored
//! timestamps, so every read reflects the current time rather than the time
//! of the last write.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::command::DeliveryTarget;
use crate::dal::{Finalized, QueueStats, DAL};
use crate::error::StoreError;
use crate::health::{HealthPolicy, HealthState};
use crate::models::InboxStatus;
use crate::protocol::DeliveryOutcome;
use crate::retry::RetryPolicy;

/// Endpoint counts by health state, plus queue counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrySummary {
    pub healthy: i64,
    pub degraded: i64,
    pub archived: i64,
    pub archived_servers: i64,
    pub tasks: QueueStats,
}

#[derive(Clone)]
pub struct EndpointRegistry {
    dal: DAL,
    health: HealthPolicy,
    retry: RetryPolicy,
}

impl EndpointRegistry {
    pub fn new(dal: DAL, health: HealthPolicy, retry: RetryPolicy) -> Self {
        Self { dal, health, retry }
    }

    pub fn health_policy(&self) -> &HealthPolicy {
        &self.health
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Records the outcome of one delivery attempt.
    ///
    /// Task disposition, counters, endpoint health, contacts and server are
    /// updated together, or not at all when `worker_id` no longer holds the
    /// task.
    pub async fn record_delivery(
        &self,
        task_id: i64,
        worker_id: i64,
        target: &DeliveryTarget,
        outcome: &DeliveryOutcome,
    ) -> Result<Finalized, StoreError> {
        self.dal
            .delivery()
            .finalize(task_id, worker_id, target, outcome, &self.retry, &self.health)
            .await
    }

    /// Stored record and current health of one endpoint.
    pub async fn status(
        &self,
        url: &str,
    ) -> Result<Option<(InboxStatus, HealthState)>, StoreError> {
        let url = StoreError::normalized_url(url)?;
        let now = Utc::now();
        Ok(self
            .dal
            .inbox_status()
            .get(&url)
            .await?
            .map(|status| {
                let state = status.health(now, &self.health);
                (status, state)
            }))
    }

    pub async fn summary(&self) -> Result<RegistrySummary, StoreError> {
        self.summary_at(Utc::now()).await
    }

    pub async fn summary_at(&self, now: DateTime<Utc>) -> Result<RegistrySummary, StoreError> {
        let mut summary = RegistrySummary {
            tasks: self.dal.task_queue().stats().await?,
            archived_servers: self.dal.remote_server().list_archived().await?.len() as i64,
            ..Default::default()
        };
        for status in self.dal.inbox_status().list().await? {
            match status.health(now, &self.health) {
                HealthState::Healthy => summary.healthy += 1,
                HealthState::Degraded => summary.degraded += 1,
                HealthState::Archived => summary.archived += 1,
            }
        }
        Ok(summary)
    }

    /// Endpoints currently excluded from fan-out.
    pub async fn list_archived(&self) -> Result<Vec<InboxStatus>, StoreError> {
        self.dal.inbox_status().list_archived().await
    }

    /// Lifts archival of an endpoint and lets its servers be contacted
    /// right away. The failure streak is kept: one more failure archives it
    /// again, one success revives it.
    ///
    /// Returns `false` if neither an endpoint nor a server matched `url`.
    pub async fn force_reprobe(&self, url: &str) -> Result<bool, StoreError> {
        let url = StoreError::normalized_url(url)?;
        let endpoint_found = self.dal.inbox_status().set_archived(&url, false).await?;

        let mut server_ids: BTreeSet<i64> = self
            .dal
            .remote_contact()
            .by_endpoint(&url)
            .await?
            .into_iter()
            .map(|contact| contact.server_id)
            .collect();
        if let Some(server) = self.dal.remote_server().get_by_url(&url).await? {
            server_ids.insert(server.id);
        }
        for id in &server_ids {
            self.dal.remote_server().mark_due(*id).await?;
        }

        let found = endpoint_found || !server_ids.is_empty();
        if found {
            info!(url = %url, servers = server_ids.len(), "Endpoint scheduled for reprobe");
        }
        Ok(found)
    }

    /// Archives an endpoint (and the contacts behind it) by operator
    /// request, or a server when `url` names one.
    pub async fn force_archive(&self, url: &str) -> Result<bool, StoreError> {
        let url = StoreError::normalized_url(url)?;
        let mut found = self.dal.inbox_status().set_archived(&url, true).await?;
        if let Some(server) = self.dal.remote_server().get_by_url(&url).await? {
            found |= self.dal.remote_server().set_archived(server.id, true).await?;
        }
        Ok(found)
    }

    /// Archives endpoints that crossed the threshold while no delivery was
    /// attempted. Returns the newly archived URLs.
    pub async fn health_sweep(&self) -> Result<Vec<String>, StoreError> {
        self.health_sweep_at(Utc::now()).await
    }

    pub async fn health_sweep_at(&self, now: DateTime<Utc>) -> Result<Vec<String>, StoreError> {
        let archived = self.dal.inbox_status().sweep(now, &self.health).await?;
        if !archived.is_empty() {
            info!(count = archived.len(), "Health sweep archived endpoints");
        }
        Ok(archived)
    }
}

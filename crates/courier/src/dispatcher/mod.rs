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

//! Delivery Dispatcher: turns one content item and its audience into the
//! smallest set of delivery tasks.
//!
//! Contacts are grouped by the physical endpoint they are reached through.
//! Three followers behind one shared inbox produce one task, and the
//! content's queued counter grows by one.
//!
//! ```rust,ignore
//! let dispatcher = DeliveryDispatcher::new(dal.clone()).with_signal(signal);
//! let report = dispatcher
//!     .fan_out(&ContentItem::new("post-42"), &Audience::followers_of(1))
//!     .await?;
//! println!("queued {} deliveries", report.task_ids.len());
//! ```

pub mod relay;

pub use relay::RelayFilter;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::command::{Command, DeliveryTarget};
use crate::config::CourierConfig;
use crate::dal::DAL;
use crate::error::DispatchError;
use crate::health::{HealthPolicy, HealthState};
use crate::models::{normalize_url, Priority, RemoteContact, RemoteServer};
use crate::protocol::Protocol;
use crate::signal::WorkSignal;

/// The content being distributed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentItem {
    pub id: String,
    pub tags: Vec<String>,
    /// Directly triggered by a user action (a reply, a like); delivered
    /// ahead of ordinary posts.
    pub interactive: bool,
    /// Only public content is ever pushed to relays.
    pub public: bool,
}

impl ContentItem {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            public: true,
            ..Default::default()
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn interactive(mut self) -> Self {
        self.interactive = true;
        self
    }

    pub fn private(mut self) -> Self {
        self.public = false;
        self
    }
}

/// Who a content item is visible to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Audience {
    /// Mentioned contacts and resolved circle members.
    pub contact_ids: Vec<i64>,
    /// Followers of this local account.
    pub followers_of: Option<i64>,
    pub include_relays: bool,
}

impl Audience {
    pub fn contacts(ids: impl IntoIterator<Item = i64>) -> Self {
        Self {
            contact_ids: ids.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn followers_of(owner_id: i64) -> Self {
        Self {
            followers_of: Some(owner_id),
            ..Default::default()
        }
    }

    pub fn with_relays(mut self) -> Self {
        self.include_relays = true;
        self
    }
}

/// What a fan-out did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanOutReport {
    /// Newly queued delivery tasks.
    pub task_ids: Vec<i64>,
    /// Endpoints left out because they or their server are archived.
    pub skipped_archived: Vec<String>,
    /// Contacts left out because they are archived.
    pub archived_contacts: Vec<i64>,
    /// Endpoints already covered by a live task for this content.
    pub already_queued: Vec<String>,
    pub queued_by_protocol: BTreeMap<Protocol, i64>,
}

impl FanOutReport {
    pub fn queued(&self) -> i64 {
        self.queued_by_protocol.values().sum()
    }
}

/// One physical endpoint and what is known about how to reach it.
#[derive(Debug)]
struct Endpoint {
    protocol: Protocol,
    server_id: i64,
    shared: bool,
    /// Reached only through relay actors.
    relay_only: bool,
}

#[derive(Clone)]
pub struct DeliveryDispatcher {
    dal: DAL,
    relays: RelayFilter,
    health: HealthPolicy,
    ignore_archived: bool,
    signal: Option<Arc<dyn WorkSignal>>,
}

impl DeliveryDispatcher {
    pub fn new(dal: DAL) -> Self {
        Self {
            dal,
            relays: RelayFilter::default(),
            health: HealthPolicy::default(),
            ignore_archived: false,
            signal: None,
        }
    }

    pub fn from_config(dal: DAL, config: &CourierConfig) -> Self {
        Self::new(dal)
            .ignore_archived(config.ignore_archived())
            .with_relay_filter(RelayFilter::new(config.relay_deny_tags()))
            .with_health_policy(config.health_policy())
    }

    /// Threshold used to judge whether an endpoint is archived.
    pub fn with_health_policy(mut self, health: HealthPolicy) -> Self {
        self.health = health;
        self
    }

    /// Deliver to archived endpoints as well.
    pub fn ignore_archived(mut self, ignore: bool) -> Self {
        self.ignore_archived = ignore;
        self
    }

    pub fn with_relay_filter(mut self, relays: RelayFilter) -> Self {
        self.relays = relays;
        self
    }

    /// Wake schedulers after queueing.
    pub fn with_signal(mut self, signal: Arc<dyn WorkSignal>) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Queues one delivery task per physical endpoint in `audience`.
    pub async fn fan_out(
        &self,
        content: &ContentItem,
        audience: &Audience,
    ) -> Result<FanOutReport, DispatchError> {
        let mut report = FanOutReport::default();
        let contacts = self.resolve_audience(content, audience, &mut report).await?;
        let endpoints = self.group_by_endpoint(contacts)?;

        let server_ids: Vec<i64> = endpoints
            .values()
            .map(|e| e.server_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let servers: HashMap<i64, RemoteServer> = self
            .dal
            .remote_server()
            .get_many(server_ids)
            .await?
            .into_iter()
            .map(|s| (s.id, s))
            .collect();

        let now = Utc::now();
        let base_priority = if content.interactive {
            Priority::HIGH
        } else {
            Priority::MEDIUM
        };

        for (url, endpoint) in endpoints {
            let server = servers.get(&endpoint.server_id);
            let status = self.dal.inbox_status().ensure(&url, endpoint.shared).await?;
            // A streak past the threshold counts even before the sweep flags it.
            let archived = status.health(now, &self.health) == HealthState::Archived
                || server.map_or(false, |s| s.archived);
            if archived && !self.ignore_archived {
                debug!(endpoint = %url, "Skipping archived endpoint");
                report.skipped_archived.push(url);
                continue;
            }

            let priority = if endpoint.relay_only {
                Priority::LOW
            } else {
                base_priority
            };
            // A backed-off server is not contacted before its next contact time.
            let not_before = server
                .filter(|s| !s.is_due(now))
                .and_then(|s| s.next_contact);

            let command = Command::Deliver(DeliveryTarget {
                content_id: content.id.clone(),
                protocol: endpoint.protocol,
                endpoint: url.clone(),
                server_id: Some(endpoint.server_id),
            });
            let enqueued = self
                .dal
                .task_queue()
                .submit(&command, priority, not_before)
                .await?;
            if enqueued.inserted {
                report.task_ids.push(enqueued.id);
                *report.queued_by_protocol.entry(endpoint.protocol).or_insert(0) += 1;
            } else {
                report.already_queued.push(url);
            }
        }

        for (protocol, count) in &report.queued_by_protocol {
            self.dal
                .delivery_record()
                .add_queued(&content.id, *protocol, *count)
                .await?;
        }

        if !report.task_ids.is_empty() {
            if let Some(signal) = &self.signal {
                signal.notify().await;
            }
        }

        info!(
            content_id = %content.id,
            queued = report.task_ids.len(),
            skipped_archived = report.skipped_archived.len(),
            archived_contacts = report.archived_contacts.len(),
            already_queued = report.already_queued.len(),
            "Fan-out complete"
        );
        Ok(report)
    }

    /// Contacts the content goes to, each at most once.
    async fn resolve_audience(
        &self,
        content: &ContentItem,
        audience: &Audience,
        report: &mut FanOutReport,
    ) -> Result<Vec<(RemoteContact, bool)>, DispatchError> {
        let mut seen = BTreeSet::new();
        let mut resolved = Vec::new();

        let mut direct = self
            .dal
            .remote_contact()
            .get_many(audience.contact_ids.clone())
            .await?;
        if let Some(owner) = audience.followers_of {
            direct.extend(self.dal.remote_contact().followers_of(owner).await?);
        }
        for contact in direct {
            if seen.insert(contact.id) {
                self.admit(contact, false, &mut resolved, report);
            }
        }

        if audience.include_relays && content.public {
            let relay_servers: Vec<i64> = self
                .dal
                .remote_server()
                .list_relays()
                .await?
                .into_iter()
                .filter(|server| self.relays.accepts(server, &content.tags))
                .map(|server| server.id)
                .collect();
            for contact in self.dal.remote_contact().relay_contacts(relay_servers).await? {
                if seen.insert(contact.id) {
                    self.admit(contact, true, &mut resolved, report);
                }
            }
        }

        Ok(resolved)
    }

    /// Archived contacts get nothing until a success or an operator revives them.
    fn admit(
        &self,
        contact: RemoteContact,
        via_relay: bool,
        resolved: &mut Vec<(RemoteContact, bool)>,
        report: &mut FanOutReport,
    ) {
        if contact.archived && !self.ignore_archived {
            debug!(contact_id = contact.id, "Skipping archived contact");
            report.archived_contacts.push(contact.id);
        } else {
            resolved.push((contact, via_relay));
        }
    }

    fn group_by_endpoint(
        &self,
        contacts: Vec<(RemoteContact, bool)>,
    ) -> Result<BTreeMap<String, Endpoint>, DispatchError> {
        let mut endpoints: BTreeMap<String, Endpoint> = BTreeMap::new();
        for (contact, via_relay) in contacts {
            let raw = contact.delivery_endpoint();
            let url = normalize_url(raw).map_err(|source| DispatchError::InvalidEndpoint {
                url: raw.to_string(),
                source,
            })?;
            endpoints
                .entry(url)
                .and_modify(|e| e.relay_only &= via_relay)
                .or_insert(Endpoint {
                    protocol: contact.protocol,
                    server_id: contact.server_id,
                    shared: contact.uses_shared_inbox(),
                    relay_only: via_relay,
                });
        }
        Ok(endpoints)
    }
}

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

//! The contract between the engine and federation protocol implementations.
//!
//! The engine never speaks a wire format itself. Each protocol supplies a
//! [`ProtocolAdapter`] that performs the network send and classifies the
//! result; the scheduler looks adapters up by [`Protocol`] through an
//! [`AdapterRegistry`].
//!
//! Adapters must tolerate re-delivery: a send whose acknowledgment was lost
//! is retried. [`DeliveryPayload::delivery_id`] is stable for a given
//! (content, endpoint) pair so a remote can drop duplicates.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace for deterministic delivery identifiers.
const DELIVERY_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2d0e_8a47_4b5e_9c33_5e0f_d1a2_b7c4);

/// Supported federation protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    ActivityPub,
    Dfrn,
    Diaspora,
    OStatus,
}

impl Protocol {
    pub const ALL: [Protocol; 4] = [
        Protocol::ActivityPub,
        Protocol::Dfrn,
        Protocol::Diaspora,
        Protocol::OStatus,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::ActivityPub => "activitypub",
            Protocol::Dfrn => "dfrn",
            Protocol::Diaspora => "diaspora",
            Protocol::OStatus => "ostatus",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "activitypub" | "apub" => Some(Protocol::ActivityPub),
            "dfrn" => Some(Protocol::Dfrn),
            "diaspora" | "dspr" => Some(Protocol::Diaspora),
            "ostatus" | "stat" => Some(Protocol::OStatus),
            _ => None,
        }
    }

    /// Whether one delivery to a shared inbox reaches every actor behind it.
    pub fn supports_shared_inbox(&self) -> bool {
        matches!(self, Protocol::ActivityPub | Protocol::Diaspora)
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one delivery attempt as classified by the adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Success,
    /// Timeouts, refused connections, 5xx. Retried with back-off.
    TransientFailure(String),
    /// Rejected or gone. Not retried.
    PermanentFailure(String),
}

impl DeliveryOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DeliveryOutcome::Success)
    }
}

/// What an adapter receives for one delivery.
///
/// Rendering the content into protocol form is the adapter's job; the
/// payload only identifies what to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryPayload {
    pub content_id: String,
    pub protocol: Protocol,
    /// Stable across retries of the same (content, endpoint) pair.
    pub delivery_id: Uuid,
    /// Number of earlier failed attempts.
    pub attempt: i32,
}

impl DeliveryPayload {
    pub fn new(content_id: &str, protocol: Protocol, endpoint: &str, attempt: i32) -> Self {
        Self {
            content_id: content_id.to_string(),
            protocol,
            delivery_id: delivery_id(content_id, endpoint),
            attempt,
        }
    }
}

/// Deterministic identifier for delivering `content_id` to `endpoint`.
pub fn delivery_id(content_id: &str, endpoint: &str) -> Uuid {
    let name = format!("{}\n{}", content_id, endpoint);
    Uuid::new_v5(&DELIVERY_NAMESPACE, name.as_bytes())
}

/// A federation protocol implementation.
#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    /// Sends `payload` to `endpoint` and classifies the result.
    ///
    /// Implementations bound the request with their own timeout; the
    /// scheduler additionally enforces its task timeout.
    async fn deliver(&self, endpoint: &str, payload: &DeliveryPayload) -> DeliveryOutcome;
}

/// Adapters keyed by protocol.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: Arc<RwLock<HashMap<Protocol, Arc<dyn ProtocolAdapter>>>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `adapter` for `protocol`, replacing any previous one.
    pub fn register(&self, protocol: Protocol, adapter: Arc<dyn ProtocolAdapter>) {
        self.adapters.write().insert(protocol, adapter);
    }

    pub fn get(&self, protocol: Protocol) -> Option<Arc<dyn ProtocolAdapter>> {
        self.adapters.read().get(&protocol).cloned()
    }

    pub fn protocols(&self) -> Vec<Protocol> {
        let mut protocols: Vec<_> = self.adapters.read().keys().copied().collect();
        protocols.sort();
        protocols
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("protocols", &self.protocols())
            .finish()
    }
}

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

//! Remote actors and the local accounts they relate to.

use chrono::{DateTime, Utc};

use crate::protocol::Protocol;

/// A remote actor. `server_id` and `owner_id` are plain foreign keys.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteContact {
    pub id: i64,
    pub server_id: i64,
    pub owner_id: i64,
    pub protocol: Protocol,
    pub inbox: String,
    pub shared_inbox: Option<String>,
    pub is_follower: bool,
    pub is_relay: bool,
    pub last_delivered: Option<DateTime<Utc>>,
    pub last_failed_delivery: Option<DateTime<Utc>>,
    pub archived: bool,
}

impl RemoteContact {
    /// The physical endpoint deliveries for this contact go to.
    ///
    /// Protocols with shared inboxes collapse onto the shared inbox when the
    /// contact advertises one.
    pub fn delivery_endpoint(&self) -> &str {
        match &self.shared_inbox {
            Some(shared) if self.protocol.supports_shared_inbox() && !shared.is_empty() => shared,
            _ => &self.inbox,
        }
    }

    pub fn uses_shared_inbox(&self) -> bool {
        self.delivery_endpoint() != self.inbox
    }
}

#[derive(Debug, Clone)]
pub struct NewRemoteContact {
    pub server_id: i64,
    pub owner_id: i64,
    pub protocol: Protocol,
    pub inbox: String,
    pub shared_inbox: Option<String>,
    pub is_follower: bool,
    pub is_relay: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(protocol: Protocol, shared: Option<&str>) -> RemoteContact {
        RemoteContact {
            id: 1,
            server_id: 1,
            owner_id: 1,
            protocol,
            inbox: "https://remote.example/users/alice/inbox".into(),
            shared_inbox: shared.map(str::to_string),
            is_follower: true,
            is_relay: false,
            last_delivered: None,
            last_failed_delivery: None,
            archived: false,
        }
    }

    #[test]
    fn test_shared_inbox_used_when_protocol_supports_it() {
        let c = contact(Protocol::ActivityPub, Some("https://remote.example/inbox"));
        assert_eq!(c.delivery_endpoint(), "https://remote.example/inbox");
        assert!(c.uses_shared_inbox());
    }

    #[test]
    fn test_personal_inbox_for_protocols_without_shared_inbox() {
        let c = contact(Protocol::Dfrn, Some("https://remote.example/inbox"));
        assert_eq!(c.delivery_endpoint(), "https://remote.example/users/alice/inbox");
        assert!(!c.uses_shared_inbox());
    }

    #[test]
    fn test_empty_shared_inbox_ignored() {
        let c = contact(Protocol::ActivityPub, Some(""));
        assert_eq!(c.delivery_endpoint(), "https://remote.example/users/alice/inbox");
    }
}

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

//! Relay scope predicates.
//!
//! A relay server subscribes either to everything public (`all`) or to a
//! list of tags (`tags`). The same rule decides both directions: which of
//! our posts are pushed to a relay, and which posts arriving from a relay
//! we accept. Deny tags always win.

use std::collections::BTreeSet;

use crate::models::{RelayScope, RemoteServer};

fn normalize_tag(tag: &str) -> String {
    tag.trim().trim_start_matches('#').to_lowercase()
}

/// Tag-based relay filtering with an operator deny list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayFilter {
    deny_tags: BTreeSet<String>,
}

impl RelayFilter {
    pub fn new<I, S>(deny_tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            deny_tags: deny_tags
                .into_iter()
                .map(|t| normalize_tag(t.as_ref()))
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    /// Whether any of `tags` is on the deny list.
    pub fn is_denied(&self, tags: &[String]) -> bool {
        tags.iter()
            .any(|tag| self.deny_tags.contains(&normalize_tag(tag)))
    }

    /// Whether a post carrying `tags` falls within a relay subscription of
    /// `scope` over `subscribed` tags.
    pub fn is_solicited_post(&self, scope: RelayScope, subscribed: &[String], tags: &[String]) -> bool {
        if scope == RelayScope::None {
            return false;
        }
        if self.is_denied(tags) {
            return false;
        }
        match scope {
            RelayScope::All => true,
            RelayScope::Tags => {
                let wanted: BTreeSet<String> = subscribed.iter().map(|t| normalize_tag(t)).collect();
                tags.iter().any(|tag| wanted.contains(&normalize_tag(tag)))
            }
            RelayScope::None => false,
        }
    }

    /// Whether a public post carrying `tags` should be pushed to `server`.
    pub fn accepts(&self, server: &RemoteServer, tags: &[String]) -> bool {
        server.relay_subscribe
            && self.is_solicited_post(server.relay_scope, &server.relay_tags, tags)
    }
}

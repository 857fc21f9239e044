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

//! Federated nodes known to this instance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical form of an endpoint or server URL.
///
/// Scheme and host are lowercased, default ports and fragments dropped, and
/// trailing slashes removed, so two spellings of one address compare equal.
pub fn normalize_url(raw: &str) -> Result<String, url::ParseError> {
    let mut url = url::Url::parse(raw.trim())?;
    url.set_fragment(None);
    let mut normalized: String = url.into();
    if !normalized.contains('?') {
        while normalized.ends_with('/') {
            normalized.pop();
        }
    }
    Ok(normalized)
}

/// Which content a subscribed relay should receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayScope {
    /// Not a relay subscription.
    None,
    /// Every public post.
    All,
    /// Only posts carrying one of the subscribed tags.
    Tags,
}

impl RelayScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayScope::None => "",
            RelayScope::All => "all",
            RelayScope::Tags => "tags",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "all" => RelayScope::All,
            "tags" => RelayScope::Tags,
            _ => RelayScope::None,
        }
    }
}

/// A remote server. `normalized_url` is the unique key.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteServer {
    pub id: i64,
    pub url: String,
    pub normalized_url: String,
    pub protocol: String,
    pub register_policy: i32,
    /// Set after a failed contact, cleared by the next success.
    pub failed: bool,
    pub archived: bool,
    pub last_contact: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    /// Earliest time worth probing again while `failed`.
    pub next_contact: Option<DateTime<Utc>>,
    pub relay_subscribe: bool,
    pub relay_scope: RelayScope,
    pub relay_tags: Vec<String>,
}

impl RemoteServer {
    /// Whether the back-off window has passed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.failed || self.next_contact.map_or(true, |next| next <= now)
    }
}

/// Registration data for a server seen for the first time.
#[derive(Debug, Clone)]
pub struct NewRemoteServer {
    pub url: String,
    pub protocol: String,
    pub register_policy: i32,
    pub relay_subscribe: bool,
    pub relay_scope: RelayScope,
    pub relay_tags: Vec<String>,
}

impl NewRemoteServer {
    pub fn new(url: impl Into<String>, protocol: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            protocol: protocol.into(),
            register_policy: 0,
            relay_subscribe: false,
            relay_scope: RelayScope::None,
            relay_tags: Vec::new(),
        }
    }

    /// Marks the server as a relay subscribed with `scope`.
    pub fn relay(mut self, scope: RelayScope, tags: Vec<String>) -> Self {
        self.relay_subscribe = true;
        self.relay_scope = scope;
        self.relay_tags = tags;
        self
    }
}

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

//! Domain models for tasks, remote endpoints and delivery accounting.
//!
//! These are the types callers see. The Diesel row structs they are loaded
//! from live in [`crate::dal::models`].

pub mod delivery_record;
pub mod inbox_status;
pub mod remote_contact;
pub mod remote_server;
pub mod task;

pub use delivery_record::{DeliveryRecord, ProtocolCounters};
pub use inbox_status::InboxStatus;
pub use remote_contact::{NewRemoteContact, RemoteContact};
pub use remote_server::{normalize_url, NewRemoteServer, RelayScope, RemoteServer};
pub use task::{Priority, Task, TaskOutcome, TaskState};

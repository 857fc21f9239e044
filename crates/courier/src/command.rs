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

//! Typed task commands.
//!
//! Every task row stores a command name and an ordered parameter list. This
//! module is the only place that maps between that stored form and the
//! closed set of commands the scheduler can run, so an unknown or
//! malformed command is rejected when decoded instead of at dispatch time.

use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::CommandError;
use crate::protocol::Protocol;

const DEDUP_NAMESPACE: Uuid = Uuid::from_u128(0x1b8e_54f0_77c2_4e0a_a5d6_c0ff_ee15_9a01);

/// One delivery to one physical endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeliveryTarget {
    pub content_id: String,
    pub protocol: Protocol,
    pub endpoint: String,
    /// Server hosting the endpoint, when known.
    pub server_id: Option<i64>,
}

/// A unit of work the scheduler knows how to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Deliver a content item to one endpoint through a protocol adapter.
    Deliver(DeliveryTarget),
    /// Advance silent degraded endpoints to archived.
    HealthSweep,
    /// Delete finished tasks past the retention window.
    QueueCleanup,
}

impl Command {
    pub const DELIVER: &'static str = "Delivery";
    pub const HEALTH_SWEEP: &'static str = "HealthSweep";
    pub const QUEUE_CLEANUP: &'static str = "QueueCleanup";

    /// Stored command name.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Deliver(_) => Self::DELIVER,
            Command::HealthSweep => Self::HEALTH_SWEEP,
            Command::QueueCleanup => Self::QUEUE_CLEANUP,
        }
    }

    /// Stored parameter list, in order.
    pub fn parameters(&self) -> Vec<Value> {
        match self {
            Command::Deliver(target) => vec![
                json!(target.content_id),
                json!(target.protocol.as_str()),
                json!(target.endpoint),
                json!(target.server_id),
            ],
            Command::HealthSweep | Command::QueueCleanup => Vec::new(),
        }
    }

    /// Identity of this command for enqueue deduplication.
    ///
    /// Two commands with the same name and parameters share a key, so at most
    /// one of them can be pending at a time.
    pub fn dedup_key(&self) -> String {
        let params = Value::Array(self.parameters()).to_string();
        let name = format!("{}\n{}", self.name(), params);
        Uuid::new_v5(&DEDUP_NAMESPACE, name.as_bytes()).to_string()
    }

    /// Rebuilds a command from its stored name and parameters.
    pub fn from_parts(name: &str, parameters: &[Value]) -> Result<Self, CommandError> {
        match name {
            Self::DELIVER => {
                expect_len(name, parameters, 4)?;
                let content_id = string_at(name, parameters, 0)?;
                let protocol_name = string_at(name, parameters, 1)?;
                let protocol = Protocol::from_str(&protocol_name).ok_or_else(|| {
                    CommandError::InvalidParameter {
                        command: name.to_string(),
                        position: 1,
                        message: format!("unknown protocol '{}'", protocol_name),
                    }
                })?;
                let endpoint = string_at(name, parameters, 2)?;
                let server_id = match &parameters[3] {
                    Value::Null => None,
                    value => Some(value.as_i64().ok_or_else(|| CommandError::InvalidParameter {
                        command: name.to_string(),
                        position: 3,
                        message: "expected an integer server id".into(),
                    })?),
                };
                Ok(Command::Deliver(DeliveryTarget {
                    content_id,
                    protocol,
                    endpoint,
                    server_id,
                }))
            }
            Self::HEALTH_SWEEP => {
                expect_len(name, parameters, 0)?;
                Ok(Command::HealthSweep)
            }
            Self::QUEUE_CLEANUP => {
                expect_len(name, parameters, 0)?;
                Ok(Command::QueueCleanup)
            }
            other => Err(CommandError::UnknownCommand(other.to_string())),
        }
    }
}

fn expect_len(command: &str, parameters: &[Value], expected: usize) -> Result<(), CommandError> {
    if parameters.len() != expected {
        return Err(CommandError::ParameterCount {
            command: command.to_string(),
            expected,
            actual: parameters.len(),
        });
    }
    Ok(())
}

fn string_at(command: &str, parameters: &[Value], position: usize) -> Result<String, CommandError> {
    parameters[position]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| CommandError::InvalidParameter {
            command: command.to_string(),
            position,
            message: "expected a string".into(),
        })
}

// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MQTT front end for Home Assistant.
//!
//! The gateway translates between Home Assistant's MQTT light, switch and
//! binary sensor entities and the command queue:
//!
//! - [`Component`] lays out the per-address topics,
//! - [`parse_command`] turns command payloads into [`Action`](crate::command::Action)s,
//! - [`discovery_messages`] builds the retained discovery documents,
//! - [`MqttGateway`] runs the broker connection.
//!
//! State is published only from the queue's event stream, so what Home
//! Assistant sees is always what the state store holds.

mod discovery;
mod mqtt;
mod payload;
mod topics;

pub use discovery::{DiscoveryMessage, bridge_config, discovery_messages, entity_config};
pub use mqtt::{
    BrokerConfig, DEFAULT_KEEP_ALIVE, DEFAULT_PORT, DEFAULT_TLS_PORT, MqttGateway, TlsFiles,
    read_credentials, route_command,
};
pub use payload::{MAX_TRANSITION, parse_command, state_payload};
pub use topics::{BRIDGE_TOPIC, COMMAND_FILTERS, Component, parse_set_topic};

// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Event stream published by the command queue.
//!
//! The [`EventBus`] uses tokio's broadcast channel so the MQTT gateway,
//! loggers and tests can all follow state changes, command outcomes and
//! link changes independently.
//!
//! # Examples
//!
//! ```
//! use cbus_bridge::command::CommandId;
//! use cbus_bridge::event::{BridgeEvent, EventBus};
//! use cbus_bridge::types::GroupAddress;
//!
//! let bus = EventBus::new();
//! let mut outcomes = bus.subscribe();
//!
//! bus.publish(BridgeEvent::confirmed(CommandId::new(1), GroupAddress::new(5)));
//! assert!(!outcomes.try_recv().unwrap().is_failure());
//! ```

mod bridge_event;
mod event_bus;

pub use bridge_event::{BridgeEvent, CommandOutcome};
pub use event_bus::{DEFAULT_EVENT_CAPACITY, EventBus};

// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `cbus_bridge` - A bridge between a C-Bus lighting network and MQTT.
//!
//! The bridge drives a C-Bus PC Interface (serial or TCP) and exposes every
//! lighting group address to Home Assistant through MQTT discovery.
//!
//! # Architecture
//!
//! ```text
//!  Home Assistant ──MQTT──> gateway ──enqueue──> CommandQueue ──frames──> LinkSupervisor ──> PCI
//!        ^                                           │   ^                       │
//!        └──────────── state ── BridgeEvent ─────────┘   └──── LinkEvent ────────┘
//! ```
//!
//! - [`queue`]: reliable command queue. One command in flight, confirmation
//!   matching, bounded retries, supersession of stale commands.
//! - [`ramp`]: turns timed transitions into a native ramp or a series of
//!   level steps.
//! - [`state`]: confirmed and assumed level per group address.
//! - [`codec`]: wire format of the bus interface.
//! - [`transport`]: the byte link with automatic reconnection.
//! - [`gateway`]: the MQTT front end (feature `mqtt`).
//!
//! # Quick Start
//!
//! ```no_run
//! use cbus_bridge::codec::{FrameCodec, PciCodec};
//! use cbus_bridge::command::Action;
//! use cbus_bridge::config::{QueueConfig, ReconnectionPolicy};
//! use cbus_bridge::queue::{CommandQueue, Dispatcher};
//! use cbus_bridge::transport::{LinkConfig, LinkSupervisor};
//! use cbus_bridge::types::GroupAddress;
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> cbus_bridge::Result<()> {
//!     let codec = PciCodec::new();
//!     let handshake = codec.handshake();
//!     let dispatcher = Dispatcher::new(codec, QueueConfig::default(), Vec::<GroupAddress>::new());
//!
//!     let (link_tx, link_rx) = mpsc::channel(64);
//!     let (frames_tx, frames_rx) = mpsc::channel(64);
//!     let (queue, _engine) = CommandQueue::spawn(dispatcher, link_rx, frames_tx);
//!
//!     let supervisor = LinkSupervisor::new(
//!         LinkConfig::tcp("192.0.2.1:10001"),
//!         ReconnectionPolicy::default(),
//!         handshake,
//!     );
//!     let _link = supervisor.spawn(link_tx, frames_rx);
//!
//!     queue.enqueue(GroupAddress::new(12), Action::On)?;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod command;
pub mod config;
pub mod error;
pub mod event;
#[cfg(feature = "mqtt")]
pub mod gateway;
pub mod queue;
pub mod ramp;
pub mod state;
pub mod transport;
pub mod types;

pub use error::{ConfigError, Error, ParseError, ProtocolError, Result, ValueError};

// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Reliable command queue.
//!
//! Commands are sent one at a time over the bus link. Each send attempt
//! waits for a confirmation carrying the attempt's match key; without one
//! it is retried until the [`RetryPolicy`](crate::config::RetryPolicy) is
//! exhausted. A newer command for an address supersedes an older one that
//! is still queued or unconfirmed.
//!
//! - [`Dispatcher`]: the synchronous state machine
//! - [`CommandQueue`] and [`QueueHandle`]: the tokio task around it
//!
//! # Lifecycle of a command
//!
//! ```text
//! Queued -> Sent -> Confirmed
//! Queued -> Sent -> TimedOut -> Sent -> ... -> Failed
//! Queued | Sent -> Superseded
//! ```

mod dispatcher;
mod pending;
mod service;
mod timer;

pub use dispatcher::Dispatcher;
pub use pending::{Origin, PendingDispatch, QueuedCommand};
pub use service::{CommandQueue, QueueHandle};
pub use timer::{TimerHeap, TimerKind, TimerToken};

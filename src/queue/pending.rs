// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Queued and in-flight command records.

use tokio::time::Instant;

use crate::codec::MatchKey;
use crate::command::{CommandId, LogicalCommand};
use crate::types::GroupAddress;

use super::timer::TimerToken;

/// Where a command came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Sent as requested, or as a single immediate or native ramp command.
    Direct,
    /// One step of a stepped ramp.
    RampStep {
        /// Plan the step belongs to.
        plan: u64,
        /// Whether this is the final, exact-target step.
        last: bool,
    },
}

/// A command waiting for the link.
#[derive(Debug, Clone)]
pub struct QueuedCommand {
    pub(crate) command: LogicalCommand,
    pub(crate) origin: Origin,
    /// Sends already charged to this command.
    pub(crate) attempts: u32,
}

impl QueuedCommand {
    pub(crate) fn new(command: LogicalCommand, origin: Origin) -> Self {
        Self {
            command,
            origin,
            attempts: 0,
        }
    }

    /// Returns the command.
    #[must_use]
    pub fn command(&self) -> &LogicalCommand {
        &self.command
    }

    /// Returns the number of sends already charged.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// The one send attempt awaiting confirmation.
///
/// Exists from send until the attempt is confirmed, times out, is rejected
/// or is superseded.
#[derive(Debug, Clone)]
pub struct PendingDispatch {
    pub(crate) command: LogicalCommand,
    pub(crate) origin: Origin,
    pub(crate) attempt: u32,
    pub(crate) sent_at: Instant,
    pub(crate) retry_deadline: Instant,
    pub(crate) expected_match_key: MatchKey,
    pub(crate) timer: TimerToken,
}

impl PendingDispatch {
    /// Returns the command in flight.
    #[must_use]
    pub fn command(&self) -> &LogicalCommand {
        &self.command
    }

    /// Returns the command id.
    #[must_use]
    pub const fn command_id(&self) -> CommandId {
        self.command.id()
    }

    /// Returns the target address.
    #[must_use]
    pub const fn address(&self) -> GroupAddress {
        self.command.address()
    }

    /// Returns the 1-based attempt number.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Returns when the attempt was sent.
    #[must_use]
    pub const fn sent_at(&self) -> Instant {
        self.sent_at
    }

    /// Returns when the attempt times out.
    #[must_use]
    pub const fn retry_deadline(&self) -> Instant {
        self.retry_deadline
    }

    /// Returns the key its confirmation must carry.
    #[must_use]
    pub const fn expected_match_key(&self) -> MatchKey {
        self.expected_match_key
    }
}

// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Deadline heap for confirmation timeouts and ramp steps.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use tokio::time::Instant;

use crate::command::{CommandId, LogicalCommand};
use crate::types::GroupAddress;

/// Handle to a scheduled timer, used to cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken(u64);

/// What happens when a timer fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerKind {
    /// Confirmation timeout of one send attempt.
    Confirmation {
        /// The command in flight.
        id: CommandId,
        /// The attempt the timeout belongs to.
        attempt: u32,
    },
    /// Next step of a stepped ramp is due.
    RampStep {
        /// Plan the step belongs to.
        plan: u64,
        /// The step command.
        command: LogicalCommand,
        /// Whether this is the final step.
        last: bool,
    },
    /// A native ramp should have finished.
    RampSettled {
        /// The ramping address.
        address: GroupAddress,
    },
}

/// Min-heap of deadlines with cancellation.
///
/// Cancelled entries stay in the heap until they reach the top and are
/// skipped there.
#[derive(Debug, Default)]
pub struct TimerHeap {
    heap: BinaryHeap<Reverse<(Instant, u64)>>,
    live: HashMap<u64, TimerKind>,
    next_seq: u64,
}

impl TimerHeap {
    /// Creates an empty heap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `kind` to fire at `deadline`.
    pub fn schedule(&mut self, deadline: Instant, kind: TimerKind) -> TimerToken {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse((deadline, seq)));
        self.live.insert(seq, kind);
        TimerToken(seq)
    }

    /// Cancels a timer. Returns `false` if it already fired or was cancelled.
    pub fn cancel(&mut self, token: TimerToken) -> bool {
        self.live.remove(&token.0).is_some()
    }

    /// Returns `true` if the timer has neither fired nor been cancelled.
    #[must_use]
    pub fn is_live(&self, token: TimerToken) -> bool {
        self.live.contains_key(&token.0)
    }

    /// Removes and returns the earliest timer due at `now`.
    ///
    /// Timers with equal deadlines fire in scheduling order.
    pub fn pop_due(&mut self, now: Instant) -> Option<(TimerToken, TimerKind)> {
        while let Some(Reverse((deadline, seq))) = self.heap.peek().copied() {
            if deadline > now {
                return None;
            }
            self.heap.pop();
            if let Some(kind) = self.live.remove(&seq) {
                return Some((TimerToken(seq), kind));
            }
        }
        None
    }

    /// Returns the earliest live deadline.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse((deadline, seq))) = self.heap.peek().copied() {
            if self.live.contains_key(&seq) {
                return Some(deadline);
            }
            self.heap.pop();
        }
        None
    }

    /// Returns the number of live timers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// Returns `true` if no timer is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

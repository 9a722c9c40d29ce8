// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Logical lighting commands.
//!
//! A [`LogicalCommand`] is what the front end asks for: turn a group on or
//! off, set it to a level, or ramp it to a level over a duration. Commands
//! are immutable once created. The command queue turns them into wire
//! frames through a [`FrameCodec`](crate::codec::FrameCodec).
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use cbus_bridge::command::{Action, ActionClass};
//! use cbus_bridge::types::Level;
//!
//! let ramp = Action::Ramp {
//!     level: Level::OFF,
//!     duration: Duration::from_secs(10),
//! };
//! assert_eq!(ramp.target_level(), Level::OFF);
//! assert_eq!(ramp.class(), ActionClass::Level);
//! assert_eq!(Action::On.class(), ActionClass::Switch);
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;

use crate::types::{GroupAddress, Level};

/// Identifier of a logical command, unique within one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommandId(u64);

impl CommandId {
    /// Creates a command id from its raw value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Shared allocator for [`CommandId`]s.
///
/// Cloning shares the counter, so ids handed out by the queue handle and
/// by the ramp scheduler never collide.
#[derive(Debug, Clone)]
pub struct CommandIds {
    next: Arc<AtomicU64>,
}

impl CommandIds {
    /// Creates a new allocator starting at 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Returns a fresh id.
    #[must_use]
    pub fn allocate(&self) -> CommandId {
        CommandId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for CommandIds {
    fn default() -> Self {
        Self::new()
    }
}

/// What a command does to its group.
///
/// Every match over this enum is exhaustive on purpose: adding an action
/// means revisiting the codec, the ramp scheduler and the state updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Switch fully on.
    On,
    /// Switch off.
    Off,
    /// Jump to a level without a transition.
    SetLevel(Level),
    /// Move to a level over a duration.
    Ramp {
        /// Final level.
        level: Level,
        /// Transition duration.
        duration: Duration,
    },
}

impl Action {
    /// Level the group ends at once the action has been applied.
    #[must_use]
    pub const fn target_level(&self) -> Level {
        match self {
            Self::On => Level::FULL,
            Self::Off => Level::OFF,
            Self::SetLevel(level) | Self::Ramp { level, .. } => *level,
        }
    }

    /// Requested transition, zero for everything but ramps.
    #[must_use]
    pub const fn transition(&self) -> Duration {
        match self {
            Self::On | Self::Off | Self::SetLevel(_) => Duration::ZERO,
            Self::Ramp { duration, .. } => *duration,
        }
    }

    /// Class used when matching confirmations.
    #[must_use]
    pub const fn class(&self) -> ActionClass {
        match self {
            Self::On | Self::Off => ActionClass::Switch,
            Self::SetLevel(_) | Self::Ramp { .. } => ActionClass::Level,
        }
    }

    /// Short name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
            Self::SetLevel(_) => "set_level",
            Self::Ramp { .. } => "ramp",
        }
    }
}

/// Coarse grouping of actions, carried in match keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionClass {
    /// On and off.
    Switch,
    /// Level and ramp.
    Level,
}

/// A command for one group address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalCommand {
    id: CommandId,
    address: GroupAddress,
    action: Action,
    enqueued_at: Instant,
}

impl LogicalCommand {
    /// Creates a command.
    #[must_use]
    pub fn new(id: CommandId, address: GroupAddress, action: Action, enqueued_at: Instant) -> Self {
        Self {
            id,
            address,
            action,
            enqueued_at,
        }
    }

    /// Returns the command id.
    #[must_use]
    pub const fn id(&self) -> CommandId {
        self.id
    }

    /// Returns the target group.
    #[must_use]
    pub const fn address(&self) -> GroupAddress {
        self.address
    }

    /// Returns the action.
    #[must_use]
    pub const fn action(&self) -> Action {
        self.action
    }

    /// Returns the level the group should end at.
    #[must_use]
    pub const fn target_level(&self) -> Level {
        self.action.target_level()
    }

    /// Returns the requested transition duration.
    #[must_use]
    pub const fn transition_duration(&self) -> Duration {
        self.action.transition()
    }

    /// Returns when the command was handed to the queue.
    #[must_use]
    pub const fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    /// Returns a copy with a different action, keeping id and timestamps.
    #[must_use]
    pub fn with_action(&self, action: Action) -> Self {
        Self { action, ..*self }
    }
}

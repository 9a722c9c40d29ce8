// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bridge event types.

use crate::command::CommandId;
use crate::state::DeviceState;
use crate::types::GroupAddress;

/// How a logical command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The interface confirmed the command.
    Confirmed,
    /// A newer command for the same address replaced it.
    Superseded {
        /// The command that replaced it.
        by: CommandId,
    },
    /// No confirmation arrived within the retry budget.
    Failed {
        /// Number of attempts sent.
        attempts: u32,
    },
}

impl CommandOutcome {
    /// Returns a short name for logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Superseded { .. } => "superseded",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Events emitted by the command queue.
///
/// State changes, command resolutions and link changes share one stream so
/// subscribers see them in the order they happened.
///
/// # Examples
///
/// ```
/// use cbus_bridge::command::CommandId;
/// use cbus_bridge::event::BridgeEvent;
/// use cbus_bridge::types::GroupAddress;
///
/// let event = BridgeEvent::failed(CommandId::new(1), GroupAddress::new(5), 4);
/// assert!(event.is_failure());
/// assert_eq!(event.address(), Some(GroupAddress::new(5)));
///
/// assert!(BridgeEvent::connected().is_link());
/// ```
#[derive(Debug, Clone)]
pub enum BridgeEvent {
    /// A device's published state changed.
    StateChanged {
        /// The device address.
        address: GroupAddress,
        /// The complete new state.
        state: DeviceState,
    },

    /// A logical command reached a terminal outcome.
    CommandResolved {
        /// The command.
        id: CommandId,
        /// The command's target address.
        address: GroupAddress,
        /// How it ended.
        outcome: CommandOutcome,
    },

    /// The bus link went up or down.
    LinkChanged {
        /// Whether the link is now connected.
        connected: bool,
    },
}

impl BridgeEvent {
    /// Returns the address this event concerns, if any.
    #[must_use]
    pub fn address(&self) -> Option<GroupAddress> {
        match self {
            Self::StateChanged { address, .. } | Self::CommandResolved { address, .. } => {
                Some(*address)
            }
            Self::LinkChanged { .. } => None,
        }
    }

    /// Returns `true` if this is a state change event.
    #[must_use]
    pub fn is_state_change(&self) -> bool {
        matches!(self, Self::StateChanged { .. })
    }

    /// Returns `true` if this reports a command that exhausted its retries.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::CommandResolved {
                outcome: CommandOutcome::Failed { .. },
                ..
            }
        )
    }

    /// Returns `true` if this is a link event.
    #[must_use]
    pub fn is_link(&self) -> bool {
        matches!(self, Self::LinkChanged { .. })
    }

    /// Creates a state changed event.
    #[must_use]
    pub fn state_changed(state: DeviceState) -> Self {
        Self::StateChanged {
            address: state.address(),
            state,
        }
    }

    /// Creates a confirmed event.
    #[must_use]
    pub fn confirmed(id: CommandId, address: GroupAddress) -> Self {
        Self::CommandResolved {
            id,
            address,
            outcome: CommandOutcome::Confirmed,
        }
    }

    /// Creates a superseded event.
    #[must_use]
    pub fn superseded(id: CommandId, address: GroupAddress, by: CommandId) -> Self {
        Self::CommandResolved {
            id,
            address,
            outcome: CommandOutcome::Superseded { by },
        }
    }

    /// Creates a failed event.
    #[must_use]
    pub fn failed(id: CommandId, address: GroupAddress, attempts: u32) -> Self {
        Self::CommandResolved {
            id,
            address,
            outcome: CommandOutcome::Failed { attempts },
        }
    }

    /// Creates a link connected event.
    #[must_use]
    pub fn connected() -> Self {
        Self::LinkChanged { connected: true }
    }

    /// Creates a link disconnected event.
    #[must_use]
    pub fn disconnected() -> Self {
        Self::LinkChanged { connected: false }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_extraction() {
        let ga = GroupAddress::new(9);
        let id = CommandId::new(1);

        assert_eq!(BridgeEvent::confirmed(id, ga).address(), Some(ga));
        assert_eq!(
            BridgeEvent::state_changed(DeviceState::new(ga)).address(),
            Some(ga)
        );
        assert_eq!(BridgeEvent::disconnected().address(), None);
    }

    #[test]
    fn failure_is_distinct_from_other_outcomes() {
        let ga = GroupAddress::new(1);
        let id = CommandId::new(1);

        assert!(BridgeEvent::failed(id, ga, 3).is_failure());
        assert!(!BridgeEvent::confirmed(id, ga).is_failure());
        assert!(!BridgeEvent::superseded(id, ga, CommandId::new(2)).is_failure());
        assert!(!BridgeEvent::state_changed(DeviceState::new(ga)).is_failure());
    }

    #[test]
    fn outcome_names() {
        assert_eq!(CommandOutcome::Confirmed.as_str(), "confirmed");
        assert_eq!(
            CommandOutcome::Superseded {
                by: CommandId::new(2)
            }
            .as_str(),
            "superseded"
        );
        assert_eq!(CommandOutcome::Failed { attempts: 1 }.as_str(), "failed");
    }
}

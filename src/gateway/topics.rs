// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Home Assistant MQTT topic layout.
//!
//! Every group address gets entity topics under the discovery prefix:
//!
//! ```text
//! homeassistant/light/cbus_<GA>/set       commands in
//! homeassistant/light/cbus_<GA>/state     state out (retained)
//! homeassistant/light/cbus_<GA>/config    discovery (retained)
//! ```
//!
//! Switches and binary sensors use the `switch` and `binary_sensor`
//! components with the same suffixes.

use crate::error::ParseError;
use crate::types::{DeviceKind, GroupAddress};

const DISCOVERY_PREFIX: &str = "homeassistant";
const OBJECT_PREFIX: &str = "cbus_";

/// Topic of the bridge's own entity.
pub const BRIDGE_TOPIC: &str = "homeassistant/binary_sensor/cbus_bridge";

/// Home Assistant component an address is announced as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    /// `light` component, dimmable or not.
    Light,
    /// `switch` component.
    Switch,
    /// `binary_sensor` component.
    BinarySensor,
}

impl Component {
    /// Returns the component for a device kind, or `None` for ignored addresses.
    #[must_use]
    pub const fn for_kind(kind: DeviceKind) -> Option<Self> {
        match kind {
            DeviceKind::Light | DeviceKind::LightNonDimmable => Some(Self::Light),
            DeviceKind::Switch => Some(Self::Switch),
            DeviceKind::BinarySensor => Some(Self::BinarySensor),
            DeviceKind::Ignore => None,
        }
    }

    /// Returns the component name used in topics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Switch => "switch",
            Self::BinarySensor => "binary_sensor",
        }
    }

    /// Returns the topic root for `address`, without a suffix.
    #[must_use]
    pub fn base_topic(&self, address: GroupAddress) -> String {
        format!("{DISCOVERY_PREFIX}/{}/{OBJECT_PREFIX}{address}", self.as_str())
    }

    /// Returns the command topic for `address`.
    #[must_use]
    pub fn set_topic(&self, address: GroupAddress) -> String {
        format!("{}/set", self.base_topic(address))
    }

    /// Returns the state topic for `address`.
    #[must_use]
    pub fn state_topic(&self, address: GroupAddress) -> String {
        format!("{}/state", self.base_topic(address))
    }

    /// Returns the discovery config topic for `address`.
    #[must_use]
    pub fn config_topic(&self, address: GroupAddress) -> String {
        format!("{}/config", self.base_topic(address))
    }
}

/// Extracts the group address from a command topic.
///
/// Any of the three components is accepted, so a command sent to the switch
/// topic of a light still reaches the light.
///
/// # Errors
///
/// Returns [`ParseError::InvalidTopic`] if the topic is not a `set` topic of
/// a known component or the address is not in 0-255.
///
/// # Examples
///
/// ```
/// use cbus_bridge::gateway::parse_set_topic;
/// use cbus_bridge::types::GroupAddress;
///
/// let ga = parse_set_topic("homeassistant/switch/cbus_12/set").unwrap();
/// assert_eq!(ga, GroupAddress::new(12));
///
/// assert!(parse_set_topic("homeassistant/light/cbus_12/state").is_err());
/// assert!(parse_set_topic("homeassistant/light/cbus_300/set").is_err());
/// ```
pub fn parse_set_topic(topic: &str) -> Result<GroupAddress, ParseError> {
    let invalid = || ParseError::InvalidTopic(topic.to_string());

    let rest = topic
        .strip_prefix(DISCOVERY_PREFIX)
        .and_then(|t| t.strip_prefix('/'))
        .ok_or_else(invalid)?;
    let (component, rest) = rest.split_once('/').ok_or_else(invalid)?;
    if !matches!(component, "light" | "switch" | "binary_sensor") {
        return Err(invalid());
    }

    let address = rest
        .strip_prefix(OBJECT_PREFIX)
        .and_then(|t| t.strip_suffix("/set"))
        .ok_or_else(invalid)?;
    address.parse().map_err(|_| invalid())
}

/// Subscription filters covering every command topic.
///
/// Commands may arrive on the light or the switch topic of any address.
/// The device kind decides afterwards whether the command is honoured.
pub const COMMAND_FILTERS: [&str; 2] = [
    "homeassistant/light/+/set",
    "homeassistant/switch/+/set",
];

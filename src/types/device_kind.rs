// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! How a group address is presented to the home-automation platform.

use std::fmt;
use std::str::FromStr;

use crate::error::ValueError;

/// Kind of entity a group address is exposed as.
///
/// # Examples
///
/// ```
/// use cbus_bridge::types::DeviceKind;
///
/// let kind: DeviceKind = "light_non_dimmable".parse().unwrap();
/// assert!(!kind.is_dimmable());
/// assert!(kind.accepts_commands());
///
/// assert!(!DeviceKind::BinarySensor.accepts_commands());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeviceKind {
    /// Dimmable light (the default).
    #[default]
    Light,
    /// Light that only supports on and off.
    LightNonDimmable,
    /// On/off switch.
    Switch,
    /// Read-only on/off sensor.
    BinarySensor,
    /// Not exposed and not controlled at all.
    Ignore,
}

impl DeviceKind {
    /// Returns the configuration name of this kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::LightNonDimmable => "light_non_dimmable",
            Self::Switch => "switch",
            Self::BinarySensor => "binary_sensor",
            Self::Ignore => "ignore",
        }
    }

    /// Returns `true` if intermediate levels and transitions are honoured.
    #[must_use]
    pub const fn is_dimmable(&self) -> bool {
        matches!(self, Self::Light)
    }

    /// Returns `true` if the front end may send commands to this kind.
    #[must_use]
    pub const fn accepts_commands(&self) -> bool {
        matches!(self, Self::Light | Self::LightNonDimmable | Self::Switch)
    }

    /// Returns `true` if this kind is presented as a light entity.
    #[must_use]
    pub const fn is_light(&self) -> bool {
        matches!(self, Self::Light | Self::LightNonDimmable)
    }

    /// Human-readable title, e.g. `"Light Non Dimmable"`.
    #[must_use]
    pub fn title(&self) -> String {
        self.as_str()
            .split('_')
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect(),
                    None => String::new(),
                }
            })
            .collect::<Vec<String>>()
            .join(" ")
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceKind {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "light" => Ok(Self::Light),
            "light_non_dimmable" => Ok(Self::LightNonDimmable),
            "switch" => Ok(Self::Switch),
            "binary_sensor" => Ok(Self::BinarySensor),
            "ignore" => Ok(Self::Ignore),
            _ => Err(ValueError::InvalidDeviceKind(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_names() {
        for kind in [
            DeviceKind::Light,
            DeviceKind::LightNonDimmable,
            DeviceKind::Switch,
            DeviceKind::BinarySensor,
            DeviceKind::Ignore,
        ] {
            assert_eq!(kind.as_str().parse::<DeviceKind>().unwrap(), kind);
        }
    }

    #[test]
    fn titles() {
        assert_eq!(DeviceKind::Light.title(), "Light");
        assert_eq!(DeviceKind::LightNonDimmable.title(), "Light Non Dimmable");
        assert_eq!(DeviceKind::BinarySensor.title(), "Binary Sensor");
    }

    #[test]
    fn unknown_kind() {
        assert!("lamp".parse::<DeviceKind>().is_err());
    }
}

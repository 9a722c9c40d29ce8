// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-address device kinds and the exclusion list.

use std::collections::{HashMap, HashSet};

use crate::error::ValueError;
use crate::types::{DeviceKind, GroupAddress, parse_address_list};

/// Kind of every group address, [`DeviceKind::Light`] unless told otherwise.
///
/// Addresses of kind [`DeviceKind::Ignore`] form the exclusion list: the
/// command queue never sends to them and never reports on them.
///
/// # Examples
///
/// ```
/// use cbus_bridge::config::DeviceKinds;
/// use cbus_bridge::types::{DeviceKind, GroupAddress};
///
/// let (kinds, invalid) = DeviceKinds::from_lists("5,6", "7", "", "8,300");
/// assert_eq!(invalid.len(), 1);
///
/// assert_eq!(kinds.kind(GroupAddress::new(1)), DeviceKind::Light);
/// assert_eq!(kinds.kind(GroupAddress::new(6)), DeviceKind::LightNonDimmable);
/// assert_eq!(kinds.kind(GroupAddress::new(7)), DeviceKind::Switch);
/// assert!(kinds.is_excluded(GroupAddress::new(8)));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceKinds {
    kinds: HashMap<GroupAddress, DeviceKind>,
}

impl DeviceKinds {
    /// Creates a map where every address is a dimmable light.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the map from comma-separated address lists.
    ///
    /// Later lists win when an address appears more than once, so an
    /// ignored address stays ignored. Invalid entries are returned.
    #[must_use]
    pub fn from_lists(
        non_dimmable_lights: &str,
        switches: &str,
        binary_sensors: &str,
        ignore: &str,
    ) -> (Self, Vec<ValueError>) {
        let mut kinds = Self::new();
        let mut invalid = Vec::new();

        for (list, kind) in [
            (non_dimmable_lights, DeviceKind::LightNonDimmable),
            (switches, DeviceKind::Switch),
            (binary_sensors, DeviceKind::BinarySensor),
            (ignore, DeviceKind::Ignore),
        ] {
            let (addresses, errors) = parse_address_list(list);
            invalid.extend(errors);
            for address in addresses {
                kinds.set(address, kind);
            }
        }

        (kinds, invalid)
    }

    /// Sets the kind of one address.
    pub fn set(&mut self, address: GroupAddress, kind: DeviceKind) {
        if kind == DeviceKind::Light {
            self.kinds.remove(&address);
        } else {
            self.kinds.insert(address, kind);
        }
    }

    /// Sets the kind of one address.
    #[must_use]
    pub fn with_kind(mut self, address: GroupAddress, kind: DeviceKind) -> Self {
        self.set(address, kind);
        self
    }

    /// Returns the kind of `address`.
    #[must_use]
    pub fn kind(&self, address: GroupAddress) -> DeviceKind {
        self.kinds.get(&address).copied().unwrap_or_default()
    }

    /// Returns `true` if `address` is on the exclusion list.
    #[must_use]
    pub fn is_excluded(&self, address: GroupAddress) -> bool {
        self.kind(address) == DeviceKind::Ignore
    }

    /// Returns the exclusion list.
    #[must_use]
    pub fn excluded(&self) -> HashSet<GroupAddress> {
        self.kinds
            .iter()
            .filter(|(_, kind)| **kind == DeviceKind::Ignore)
            .map(|(address, _)| *address)
            .collect()
    }

    /// Iterates over every address that is exposed, with its kind.
    pub fn exposed(&self) -> impl Iterator<Item = (GroupAddress, DeviceKind)> + '_ {
        GroupAddress::all()
            .map(|address| (address, self.kind(address)))
            .filter(|(_, kind)| *kind != DeviceKind::Ignore)
    }
}

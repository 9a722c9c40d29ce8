// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Group address type for lighting groups.

use std::fmt;
use std::str::FromStr;

use crate::error::ValueError;

/// Address of one lighting group on the bus.
///
/// The lighting application uses a flat address space of 0-255, so every
/// `u8` is a valid group address. Parsing from text is checked, since
/// topics and command-line lists can carry arbitrary numbers.
///
/// # Examples
///
/// ```
/// use cbus_bridge::types::GroupAddress;
///
/// let ga: GroupAddress = "42".parse().unwrap();
/// assert_eq!(ga.value(), 42);
/// assert_eq!(ga.to_string(), "42");
///
/// assert!("256".parse::<GroupAddress>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupAddress(u8);

impl GroupAddress {
    /// Lowest group address.
    pub const MIN: Self = Self(0);

    /// Highest group address.
    pub const MAX: Self = Self(255);

    /// Creates a group address.
    #[must_use]
    pub const fn new(value: u8) -> Self {
        Self(value)
    }

    /// Returns the raw address.
    #[must_use]
    pub const fn value(&self) -> u8 {
        self.0
    }

    /// Iterates over every group address, in ascending order.
    pub fn all() -> impl Iterator<Item = Self> {
        (Self::MIN.0..=Self::MAX.0).map(Self)
    }
}

impl fmt::Display for GroupAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u8> for GroupAddress {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl FromStr for GroupAddress {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let value: i64 = trimmed
            .parse()
            .map_err(|_| ValueError::NotANumber(trimmed.to_string()))?;
        u8::try_from(value)
            .map(Self)
            .map_err(|_| ValueError::OutOfRange {
                min: 0,
                max: 255,
                actual: value,
            })
    }
}

/// Parses a comma-separated list of group addresses such as `"26,65,81"`.
///
/// Empty entries are ignored. Invalid entries are returned separately so the
/// caller can report them without rejecting the whole list.
#[must_use]
pub fn parse_address_list(list: &str) -> (Vec<GroupAddress>, Vec<ValueError>) {
    let mut addresses = Vec::new();
    let mut invalid = Vec::new();
    for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        match entry.parse() {
            Ok(ga) => addresses.push(ga),
            Err(e) => invalid.push(e),
        }
    }
    (addresses, invalid)
}

// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Lighting level type.

use std::fmt;

/// Lighting level of a group, 0 (off) to 255 (full).
///
/// # Examples
///
/// ```
/// use cbus_bridge::types::Level;
///
/// assert!(Level::OFF.is_off());
/// assert_eq!(Level::FULL.value(), 255);
///
/// // Out-of-range values coming from the front end are clamped
/// assert_eq!(Level::clamped(300), Level::FULL);
/// assert_eq!(Level::clamped(-5), Level::OFF);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Level(u8);

impl Level {
    /// Group is off.
    pub const OFF: Self = Self(0);

    /// Group is fully on.
    pub const FULL: Self = Self(255);

    /// Creates a level.
    #[must_use]
    pub const fn new(value: u8) -> Self {
        Self(value)
    }

    /// Creates a level, clamping to 0-255.
    #[must_use]
    pub fn clamped(value: i64) -> Self {
        // Safe: clamped into u8 range first
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Self(value.clamp(0, 255) as u8)
    }

    /// Returns the raw level.
    #[must_use]
    pub const fn value(&self) -> u8 {
        self.0
    }

    /// Returns `true` if the level is zero.
    #[must_use]
    pub const fn is_off(&self) -> bool {
        self.0 == 0
    }

    /// Linear interpolation from `self` towards `target`, `step` of `steps`.
    ///
    /// Step `steps` returns exactly `target`.
    #[must_use]
    pub fn interpolate(self, target: Self, step: u32, steps: u32) -> Self {
        if steps == 0 || step >= steps {
            return target;
        }
        let from = i64::from(self.0);
        let delta = i64::from(target.0) - from;
        Self::clamped(from + delta * i64::from(step) / i64::from(steps))
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u8> for Level {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Native ramp rates of the lighting application.
//!
//! The lighting application has no free-form transition time. A ramp
//! instruction carries one of sixteen fixed rates, each encoded as its own
//! command byte.

use std::time::Duration;

/// Table of (command byte, ramp duration in seconds), ascending.
const RATES: [(u8, u16); 16] = [
    (0x02, 0),
    (0x0A, 4),
    (0x12, 8),
    (0x1A, 12),
    (0x22, 20),
    (0x2A, 30),
    (0x32, 40),
    (0x3A, 60),
    (0x42, 90),
    (0x4A, 120),
    (0x52, 180),
    (0x5A, 300),
    (0x62, 420),
    (0x6A, 600),
    (0x72, 900),
    (0x7A, 1020),
];

/// A native ramp rate.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use cbus_bridge::types::RampRate;
///
/// // Requested durations round up to the next supported rate
/// let rate = RampRate::from_duration(Duration::from_secs(10)).unwrap();
/// assert_eq!(rate.duration(), Duration::from_secs(12));
/// assert_eq!(rate.code(), 0x1A);
///
/// // Nothing is slower than 17 minutes
/// assert!(RampRate::from_duration(Duration::from_secs(1021)).is_none());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RampRate {
    code: u8,
    seconds: u16,
}

impl RampRate {
    /// The instant rate, used for plain "set level" commands.
    pub const INSTANT: Self = Self {
        code: 0x02,
        seconds: 0,
    };

    /// The slowest native rate.
    pub const SLOWEST: Self = Self {
        code: 0x7A,
        seconds: 1020,
    };

    /// Picks the shortest native rate that is at least `duration` long.
    ///
    /// Returns `None` when `duration` is longer than [`RampRate::SLOWEST`].
    #[must_use]
    pub fn from_duration(duration: Duration) -> Option<Self> {
        let wanted = duration.as_secs_f64();
        RATES
            .iter()
            .find(|(_, seconds)| f64::from(*seconds) >= wanted)
            .map(|&(code, seconds)| Self { code, seconds })
    }

    /// Looks up the rate for a command byte.
    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        RATES
            .iter()
            .find(|(c, _)| *c == code)
            .map(|&(code, seconds)| Self { code, seconds })
    }

    /// Returns the command byte.
    #[must_use]
    pub const fn code(&self) -> u8 {
        self.code
    }

    /// Returns the ramp duration.
    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.seconds))
    }

    /// Returns `true` for the instant rate.
    #[must_use]
    pub const fn is_instant(&self) -> bool {
        self.seconds == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_duration_is_instant() {
        let rate = RampRate::from_duration(Duration::ZERO).unwrap();
        assert!(rate.is_instant());
        assert_eq!(rate, RampRate::INSTANT);
    }

    #[test]
    fn exact_rates_are_kept() {
        for &(code, seconds) in &RATES {
            let rate = RampRate::from_duration(Duration::from_secs(u64::from(seconds))).unwrap();
            assert_eq!(rate.code(), code);
        }
    }

    #[test]
    fn fractional_duration_rounds_up() {
        let rate = RampRate::from_duration(Duration::from_millis(500)).unwrap();
        assert_eq!(rate.duration(), Duration::from_secs(4));
    }

    #[test]
    fn code_lookup() {
        assert_eq!(RampRate::from_code(0x7A), Some(RampRate::SLOWEST));
        assert_eq!(RampRate::from_code(0x79), None);
    }
}

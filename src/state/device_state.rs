// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-address device state.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::types::{GroupAddress, Level};

/// Whether a recorded level comes from the bus or from local assumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Certainty {
    /// Reported or confirmed by the bus.
    Confirmed,
    /// Assumed locally, the bus never confirmed it.
    #[default]
    Assumed,
}

impl Certainty {
    /// Returns the lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Assumed => "assumed",
        }
    }
}

impl fmt::Display for Certainty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracked state of one group address.
///
/// A fresh state has no confirmed level and is [`Certainty::Assumed`].
/// The mutators are crate-private: only the state store changes state, so
/// `confirmed_level` moves only on confirmations and bus reports.
///
/// # Examples
///
/// ```
/// use cbus_bridge::state::{Certainty, DeviceState};
/// use cbus_bridge::types::{GroupAddress, Level};
///
/// let state = DeviceState::new(GroupAddress::new(4));
/// assert_eq!(state.confirmed_level(), None);
/// assert_eq!(state.certainty(), Certainty::Assumed);
/// assert_eq!(state.best_level(), Level::OFF);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceState {
    address: GroupAddress,
    confirmed_level: Option<Level>,
    target_level: Level,
    ramp_active: bool,
    certainty: Certainty,
    /// Transition of the most recent command or bus report.
    transition: Duration,
    /// Bus unit behind the most recent report.
    source: Option<u8>,
    last_update: DateTime<Utc>,
}

impl DeviceState {
    /// Creates the default state for an address.
    #[must_use]
    pub fn new(address: GroupAddress) -> Self {
        Self {
            address,
            confirmed_level: None,
            target_level: Level::OFF,
            ramp_active: false,
            certainty: Certainty::Assumed,
            transition: Duration::ZERO,
            source: None,
            last_update: Utc::now(),
        }
    }

    /// Returns the address.
    #[must_use]
    pub const fn address(&self) -> GroupAddress {
        self.address
    }

    /// Returns the last level the bus confirmed or reported.
    #[must_use]
    pub const fn confirmed_level(&self) -> Option<Level> {
        self.confirmed_level
    }

    /// Returns the level most recently asked for.
    #[must_use]
    pub const fn target_level(&self) -> Level {
        self.target_level
    }

    /// Returns `true` while a confirmed ramp is still running.
    #[must_use]
    pub const fn ramp_active(&self) -> bool {
        self.ramp_active
    }

    /// Returns the certainty of the recorded level.
    #[must_use]
    pub const fn certainty(&self) -> Certainty {
        self.certainty
    }

    /// Returns the transition of the most recent command or report.
    #[must_use]
    pub const fn transition(&self) -> Duration {
        self.transition
    }

    /// Returns the bus unit that caused the most recent report.
    #[must_use]
    pub const fn source(&self) -> Option<u8> {
        self.source
    }

    /// Returns when the state was last touched.
    #[must_use]
    pub const fn last_update(&self) -> DateTime<Utc> {
        self.last_update
    }

    /// Returns the level to present outward.
    ///
    /// This is the confirmed level when the state is confirmed, and the
    /// assumed target otherwise.
    #[must_use]
    pub fn best_level(&self) -> Level {
        match (self.certainty, self.confirmed_level) {
            (Certainty::Confirmed, Some(level)) => level,
            _ => self.target_level,
        }
    }

    /// Returns `true` if the best known level is above zero.
    #[must_use]
    pub fn is_on(&self) -> bool {
        !self.best_level().is_off()
    }

    // ========== Store-only mutation ==========

    /// Fields whose change is worth publishing.
    pub(crate) fn publish_key(&self) -> (Option<Level>, Certainty, bool) {
        (self.confirmed_level, self.certainty, self.ramp_active)
    }

    pub(crate) fn confirm(&mut self, level: Level) {
        self.confirmed_level = Some(level);
        self.certainty = Certainty::Confirmed;
    }

    pub(crate) fn assume(&mut self, level: Level) {
        self.target_level = level;
        self.certainty = Certainty::Assumed;
    }

    pub(crate) fn set_target(&mut self, level: Level, transition: Duration) {
        self.target_level = level;
        self.transition = transition;
    }

    pub(crate) fn set_ramp_active(&mut self, active: bool) {
        self.ramp_active = active;
    }

    pub(crate) fn set_source(&mut self, source: Option<u8>) {
        self.source = source;
    }

    pub(crate) fn touch(&mut self) {
        self.last_update = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn best_level_prefers_confirmed() {
        let mut state = DeviceState::new(GroupAddress::new(1));
        state.set_target(Level::new(200), Duration::ZERO);
        assert_eq!(state.best_level(), Level::new(200));

        state.confirm(Level::new(100));
        assert_eq!(state.best_level(), Level::new(100));
    }

    #[test]
    fn best_level_uses_target_when_assumed() {
        let mut state = DeviceState::new(GroupAddress::new(1));
        state.confirm(Level::new(100));
        state.assume(Level::new(30));
        assert_eq!(state.confirmed_level(), Some(Level::new(100)));
        assert_eq!(state.best_level(), Level::new(30));
        assert!(state.is_on());
    }

    #[test]
    fn publish_key_ignores_target() {
        let mut state = DeviceState::new(GroupAddress::new(1));
        let before = state.publish_key();
        state.set_target(Level::FULL, Duration::from_secs(4));
        assert_eq!(state.publish_key(), before);
    }

    #[test]
    fn certainty_display() {
        assert_eq!(Certainty::Confirmed.to_string(), "confirmed");
        assert_eq!(Certainty::Assumed.to_string(), "assumed");
    }
}

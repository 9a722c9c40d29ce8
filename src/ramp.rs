// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ramp expansion.
//!
//! A ramp request becomes exactly one of:
//!
//! - a single immediate command when the duration is zero,
//! - a single native ramp command when the wire protocol has one,
//! - an ordered list of `SetLevel` steps otherwise.
//!
//! The choice is made once per request. Ramps to level 0 are not special:
//! with a nonzero duration they use the native ramp like any other level.

use std::time::Duration;

use crate::command::Action;
use crate::types::Level;

/// Default number of steps for a stepped ramp.
pub const DEFAULT_STEP_COUNT: u32 = 10;

/// Most steps a ramp can use. A level has 256 values, so more steps would
/// only repeat levels.
pub const MAX_STEP_COUNT: u32 = 255;

/// One step of a stepped ramp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RampStep {
    /// Delay from the start of the ramp.
    pub offset: Duration,
    /// Level to set.
    pub level: Level,
}

impl RampStep {
    /// Returns the action this step sends.
    #[must_use]
    pub const fn action(&self) -> Action {
        Action::SetLevel(self.level)
    }
}

/// Result of expanding one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RampPlan {
    /// Send this action once, no ramp semantics.
    Immediate(Action),
    /// Send this native ramp action once.
    Native(Action),
    /// Send these steps at their offsets. The last one is the exact target.
    Stepped(Vec<RampStep>),
}

impl RampPlan {
    /// Returns `true` for a stepped plan.
    #[must_use]
    pub fn is_stepped(&self) -> bool {
        matches!(self, Self::Stepped(_))
    }
}

/// Expands ramp requests.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use cbus_bridge::command::Action;
/// use cbus_bridge::ramp::{RampPlan, RampScheduler};
/// use cbus_bridge::types::Level;
///
/// let scheduler = RampScheduler::new(5);
/// let fade_out = Action::Ramp {
///     level: Level::OFF,
///     duration: Duration::from_secs(10),
/// };
///
/// // With a native ramp instruction, fading out is a single native ramp
/// assert_eq!(
///     scheduler.plan(fade_out, Level::FULL, true),
///     RampPlan::Native(fade_out)
/// );
///
/// // Without one, it is stepped and ends exactly at the target
/// let RampPlan::Stepped(steps) = scheduler.plan(fade_out, Level::FULL, false) else {
///     unreachable!()
/// };
/// assert_eq!(steps.last().unwrap().level, Level::OFF);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RampScheduler {
    step_count: u32,
}

impl RampScheduler {
    /// Creates a scheduler producing at most `step_count` steps per ramp.
    ///
    /// The count is clamped to `1..=`[`MAX_STEP_COUNT`].
    #[must_use]
    pub fn new(step_count: u32) -> Self {
        Self {
            step_count: step_count.clamp(1, MAX_STEP_COUNT),
        }
    }

    /// Returns the configured step count.
    #[must_use]
    pub const fn step_count(&self) -> u32 {
        self.step_count
    }

    /// Expands `action` for a group currently at `current`.
    ///
    /// # Arguments
    ///
    /// * `action` - The requested action
    /// * `current` - Best known level of the group, the start of a stepped ramp
    /// * `native_supported` - Whether the codec has a native ramp for this duration
    #[must_use]
    pub fn plan(&self, action: Action, current: Level, native_supported: bool) -> RampPlan {
        let Action::Ramp { level, duration } = action else {
            return RampPlan::Immediate(action);
        };

        if duration.is_zero() {
            return RampPlan::Immediate(immediate_action(level));
        }

        if native_supported {
            return RampPlan::Native(action);
        }

        RampPlan::Stepped(self.steps(current, level, duration))
    }

    /// Step `k` of `n` goes out at `k/n` of the duration with the level
    /// `k/n` of the way to the target, so the target lands at the end.
    fn steps(&self, from: Level, to: Level, duration: Duration) -> Vec<RampStep> {
        let n = self.step_count;
        let interval = duration / n;
        let mut steps: Vec<RampStep> = Vec::with_capacity(n as usize);

        for k in 1..=n {
            let level = from.interpolate(to, k, n);
            let last = k == n;
            let previous = steps.last().map_or(from, |s| s.level);

            // Repeated levels only add bus traffic, but the final step always goes out.
            if level == previous && !last {
                continue;
            }
            if last && steps.last().is_some_and(|s| s.level == level) {
                steps.pop();
            }

            steps.push(RampStep {
                offset: if last { duration } else { interval * k },
                level,
            });
        }

        steps
    }
}

impl Default for RampScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_STEP_COUNT)
    }
}

/// Plain action for reaching `level` with no transition.
fn immediate_action(level: Level) -> Action {
    match level {
        Level::FULL => Action::On,
        Level::OFF => Action::Off,
        other => Action::SetLevel(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(level: u8, secs: u64) -> Action {
        Action::Ramp {
            level: Level::new(level),
            duration: Duration::from_secs(secs),
        }
    }

    #[test]
    fn non_ramp_actions_pass_through() {
        let scheduler = RampScheduler::default();
        assert_eq!(
            scheduler.plan(Action::On, Level::OFF, true),
            RampPlan::Immediate(Action::On)
        );
        assert_eq!(
            scheduler.plan(Action::SetLevel(Level::new(5)), Level::OFF, false),
            RampPlan::Immediate(Action::SetLevel(Level::new(5)))
        );
    }

    #[test]
    fn zero_duration_is_immediate() {
        let scheduler = RampScheduler::default();
        assert_eq!(
            scheduler.plan(ramp(255, 0), Level::OFF, true),
            RampPlan::Immediate(Action::On)
        );
        assert_eq!(
            scheduler.plan(ramp(0, 0), Level::FULL, true),
            RampPlan::Immediate(Action::Off)
        );
        assert_eq!(
            scheduler.plan(ramp(77, 0), Level::FULL, false),
            RampPlan::Immediate(Action::SetLevel(Level::new(77)))
        );
    }

    #[test]
    fn ramp_to_zero_is_native_like_any_level() {
        let scheduler = RampScheduler::default();
        let to_zero = scheduler.plan(ramp(0, 10), Level::FULL, true);
        let to_200 = scheduler.plan(ramp(200, 10), Level::FULL, true);
        assert_eq!(to_zero, RampPlan::Native(ramp(0, 10)));
        assert_eq!(to_200, RampPlan::Native(ramp(200, 10)));
    }

    #[test]
    fn stepped_ramp_is_evenly_spaced() {
        let scheduler = RampScheduler::new(5);
        let RampPlan::Stepped(steps) = scheduler.plan(ramp(255, 10), Level::OFF, false) else {
            panic!("expected stepped plan");
        };

        let levels: Vec<u8> = steps.iter().map(|s| s.level.value()).collect();
        assert_eq!(levels, vec![51, 102, 153, 204, 255]);

        let offsets: Vec<u64> = steps.iter().map(|s| s.offset.as_secs()).collect();
        assert_eq!(offsets, vec![2, 4, 6, 8, 10]);
        assert!(steps.iter().all(|s| matches!(s.action(), Action::SetLevel(_))));
    }

    #[test]
    fn stepped_ramp_drops_repeated_levels_but_keeps_final() {
        let scheduler = RampScheduler::new(10);
        let RampPlan::Stepped(steps) = scheduler.plan(ramp(3, 10), Level::OFF, false) else {
            panic!("expected stepped plan");
        };

        let levels: Vec<u8> = steps.iter().map(|s| s.level.value()).collect();
        assert_eq!(levels, vec![1, 2, 3]);
        let offsets: Vec<u64> = steps.iter().map(|s| s.offset.as_secs()).collect();
        assert_eq!(offsets, vec![4, 7, 10]);
        assert!(steps.windows(2).all(|w| w[0].offset < w[1].offset));
    }

    #[test]
    fn stepped_ramp_to_current_level_is_one_final_step() {
        let scheduler = RampScheduler::new(4);
        let RampPlan::Stepped(steps) = scheduler.plan(ramp(80, 8), Level::new(80), false) else {
            panic!("expected stepped plan");
        };
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].level, Level::new(80));
    }

    #[test]
    fn stepped_ramp_lasts_the_requested_duration() {
        let scheduler = RampScheduler::new(3);
        let RampPlan::Stepped(steps) = scheduler.plan(ramp(90, 10), Level::OFF, false) else {
            panic!("expected stepped plan");
        };

        assert!(steps[0].offset > Duration::ZERO);
        assert_eq!(steps.last().unwrap().offset, Duration::from_secs(10));
        assert_eq!(steps.last().unwrap().level, Level::new(90));
    }

    #[test]
    fn step_count_is_bounded() {
        assert_eq!(RampScheduler::new(0).step_count(), 1);
        assert_eq!(RampScheduler::new(u32::MAX).step_count(), MAX_STEP_COUNT);

        let RampPlan::Stepped(steps) =
            RampScheduler::new(u32::MAX).plan(ramp(255, 5000), Level::OFF, false)
        else {
            panic!("expected stepped plan");
        };
        assert!(steps.len() <= MAX_STEP_COUNT as usize);
    }
}

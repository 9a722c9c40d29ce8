// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Backoff between connection attempts, shared by the bus link and the
//! MQTT broker connection.

use std::time::Duration;

/// When and how often a dropped connection is re-opened.
///
/// Waits start at the first delay and double (by default) after each
/// consecutive failure, up to the ceiling. A successful connect resets the
/// count.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use cbus_bridge::config::ReconnectionPolicy;
///
/// // Default: keep trying forever
/// assert!(ReconnectionPolicy::default().should_retry(1_000));
///
/// let policy = ReconnectionPolicy::new()
///     .with_max_retries(5)
///     .with_initial_delay(Duration::from_millis(500));
/// assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
/// assert!(!policy.should_retry(5));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectionPolicy {
    give_up_after: Option<u32>,
    first_delay: Duration,
    ceiling: Duration,
    growth: f64,
}

impl ReconnectionPolicy {
    /// Retries forever, 1 s doubling up to 60 s.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Never re-opens a dropped connection.
    #[must_use]
    pub fn never() -> Self {
        Self::default().with_max_retries(0)
    }

    /// Gives up after `max_retries` consecutive failures.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.give_up_after = Some(max_retries);
        self
    }

    /// Sets the wait after the first failure.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.first_delay = delay;
        self
    }

    /// Sets the longest wait.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.ceiling = delay;
        self
    }

    /// Sets the growth factor between consecutive waits. Values below 1
    /// are treated as 1.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.growth = multiplier.max(1.0);
        self
    }

    /// Returns the limit on consecutive failures, if any.
    #[must_use]
    pub fn max_retries(&self) -> Option<u32> {
        self.give_up_after
    }

    /// Returns the wait before attempt `attempt + 1`, where `attempt` counts
    /// failures so far starting at 0.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.first_delay.as_secs_f64() * self.growth.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.ceiling)
            .min(self.ceiling)
    }

    /// Returns the wait before the next attempt after `failures`
    /// consecutive failed attempts.
    ///
    /// The first failure (and a dropped connection, with no failures yet)
    /// waits the initial delay.
    #[must_use]
    pub fn delay_after_failures(&self, failures: u32) -> Duration {
        self.delay_for_attempt(failures.saturating_sub(1))
    }

    /// Returns `true` if another attempt is allowed after `failures`
    /// consecutive failures.
    #[must_use]
    pub fn should_retry(&self, failures: u32) -> bool {
        self.give_up_after.is_none_or(|limit| failures < limit)
    }
}

impl Default for ReconnectionPolicy {
    fn default() -> Self {
        Self {
            give_up_after: None,
            first_delay: Duration::from_secs(1),
            ceiling: Duration::from_secs(60),
            growth: 2.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waits_double_up_to_the_ceiling() {
        let policy = ReconnectionPolicy::new().with_max_delay(Duration::from_secs(10));

        let waits: Vec<u64> = (0..6)
            .map(|n| policy.delay_for_attempt(n).as_secs())
            .collect();
        assert_eq!(waits, vec![1, 2, 4, 8, 10, 10]);
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn first_failure_waits_the_initial_delay() {
        let policy = ReconnectionPolicy::new().with_initial_delay(Duration::from_millis(500));

        assert_eq!(policy.delay_after_failures(0), Duration::from_millis(500));
        assert_eq!(policy.delay_after_failures(1), Duration::from_millis(500));
        assert_eq!(policy.delay_after_failures(2), Duration::from_secs(1));
        assert_eq!(policy.delay_after_failures(3), Duration::from_secs(2));
    }

    #[test]
    fn flat_backoff() {
        let policy = ReconnectionPolicy::new()
            .with_initial_delay(Duration::from_millis(250))
            .with_backoff_multiplier(0.5);
        assert_eq!(policy.delay_for_attempt(7), Duration::from_millis(250));
    }

    #[test]
    fn limit_counts_consecutive_failures() {
        let policy = ReconnectionPolicy::new().with_max_retries(2);
        assert_eq!(policy.max_retries(), Some(2));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
    }

    #[test]
    fn never_reconnects() {
        assert!(!ReconnectionPolicy::never().should_retry(0));
    }
}

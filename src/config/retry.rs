// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Confirmation timeout and retry policy.

use std::time::Duration;

/// Retry policy for commands sent on the bus link.
///
/// `max_retries` counts every send, so a policy with `max_retries = 3`
/// sends a command at most three times before reporting it failed.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use cbus_bridge::config::RetryPolicy;
///
/// let policy = RetryPolicy::new()
///     .with_max_retries(3)
///     .with_timeout(Duration::from_millis(200))
///     .with_backoff_multiplier(2.0);
///
/// assert_eq!(policy.timeout_for_attempt(1), Duration::from_millis(200));
/// assert_eq!(policy.timeout_for_attempt(2), Duration::from_millis(400));
/// assert!(policy.should_retry(2));
/// assert!(!policy.should_retry(3));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total number of sends per command.
    pub max_retries: u32,
    /// Time to wait for the first attempt's confirmation.
    pub timeout_per_attempt: Duration,
    /// Growth of the timeout with each further attempt.
    pub backoff_multiplier: f32,
    /// Upper bound for any attempt's timeout.
    pub max_timeout: Duration,
}

impl RetryPolicy {
    /// Creates a retry policy with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the total number of sends per command.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the first attempt's confirmation timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_per_attempt = timeout;
        self
    }

    /// Sets the timeout multiplier applied per attempt.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f32) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Sets the timeout cap.
    #[must_use]
    pub fn with_max_timeout(mut self, max_timeout: Duration) -> Self {
        self.max_timeout = max_timeout;
        self
    }

    /// Returns the confirmation timeout for a 1-based attempt number.
    #[must_use]
    pub fn timeout_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.backoff_multiplier.max(1.0).powi(exponent);

        // Safe: confirmation timeouts are milliseconds to seconds
        #[allow(clippy::cast_precision_loss)]
        let timeout_ms = self.timeout_per_attempt.as_millis() as f32 * factor;

        // Safe: timeout_ms is positive; saturation on overflow is capped below
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let timeout = Duration::from_millis(timeout_ms as u64);

        timeout.min(self.max_timeout.max(self.timeout_per_attempt))
    }

    /// Returns `true` if a command that has been sent `attempt` times may be
    /// sent again.
    #[must_use]
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 4,
            timeout_per_attempt: Duration::from_millis(250),
            backoff_multiplier: 1.0,
            max_timeout: Duration::from_secs(5),
        }
    }
}

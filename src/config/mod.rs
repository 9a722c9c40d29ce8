// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bridge configuration.
//!
//! Plain structs with defaults and `with_*` builders. The binary fills them
//! from its command line.

mod devices;
mod reconnection;
mod retry;

pub use devices::DeviceKinds;
pub use reconnection::ReconnectionPolicy;
pub use retry::RetryPolicy;

use std::time::Duration;

use crate::error::ConfigError;
use crate::event::DEFAULT_EVENT_CAPACITY;
use crate::ramp::DEFAULT_STEP_COUNT;
use crate::transport::LinkConfig;

/// Settings of the command queue.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use cbus_bridge::config::{QueueConfig, RetryPolicy};
///
/// let config = QueueConfig::default()
///     .with_retry(RetryPolicy::new().with_max_retries(3))
///     .with_send_interval(Duration::ZERO)
///     .with_native_ramps(false);
///
/// assert_eq!(config.retry.max_retries, 3);
/// assert!(!config.native_ramps);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    /// Confirmation timeout and retry policy.
    pub retry: RetryPolicy,
    /// Minimum spacing between two frames on the link.
    pub send_interval: Duration,
    /// Number of steps used when a ramp has to be stepped.
    pub ramp_steps: u32,
    /// Whether native ramp instructions may be used.
    pub native_ramps: bool,
    /// Events buffered per subscriber before the slowest one lags.
    pub event_capacity: usize,
}

impl QueueConfig {
    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the minimum frame spacing.
    #[must_use]
    pub fn with_send_interval(mut self, interval: Duration) -> Self {
        self.send_interval = interval;
        self
    }

    /// Sets the stepped ramp step count.
    #[must_use]
    pub fn with_ramp_steps(mut self, steps: u32) -> Self {
        self.ramp_steps = steps;
        self
    }

    /// Enables or disables native ramps.
    #[must_use]
    pub fn with_native_ramps(mut self, enabled: bool) -> Self {
        self.native_ramps = enabled;
        self
    }

    /// Sets the per-subscriber event buffer. Zero is treated as one.
    #[must_use]
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            send_interval: Duration::from_millis(100),
            ramp_steps: DEFAULT_STEP_COUNT,
            native_ramps: true,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// Everything the bus side of the bridge needs.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// How to reach the bus interface.
    pub link: LinkConfig,
    /// Link reconnection policy.
    pub reconnection: ReconnectionPolicy,
    /// Command queue settings.
    pub queue: QueueConfig,
    /// Per-address kinds and exclusion list.
    pub devices: DeviceKinds,
}

impl BridgeConfig {
    /// Creates a configuration with defaults for everything but the link.
    #[must_use]
    pub fn new(link: LinkConfig) -> Self {
        Self {
            link,
            reconnection: ReconnectionPolicy::default(),
            queue: QueueConfig::default(),
            devices: DeviceKinds::default(),
        }
    }

    /// Sets the reconnection policy.
    #[must_use]
    pub fn with_reconnection(mut self, policy: ReconnectionPolicy) -> Self {
        self.reconnection = policy;
        self
    }

    /// Sets the queue settings.
    #[must_use]
    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    /// Sets the device kinds.
    #[must_use]
    pub fn with_devices(mut self, devices: DeviceKinds) -> Self {
        self.devices = devices;
        self
    }

    /// Checks everything that must hold before dispatch may start.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the link is unusable, e.g. a serial device
    /// node that does not exist.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.link.validate()
    }
}

// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Value types for lighting control.
//!
//! # Types
//!
//! - [`GroupAddress`] - Lighting group address (0-255)
//! - [`Level`] - Lighting level (0-255)
//! - [`RampRate`] - Native ramp rates of the lighting application
//! - [`DeviceKind`] - How an address is exposed to the front end

mod device_kind;
mod group_address;
mod level;
mod ramp_rate;

pub use device_kind::DeviceKind;
pub use group_address::{GroupAddress, parse_address_list};
pub use level::Level;
pub use ramp_rate::RampRate;

// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device state tracking.
//!
//! [`DeviceState`] holds what is known about one group address and how sure
//! the bridge is about it. [`StateStore`] owns every state and publishes
//! changes worth telling the front end about.
//!
//! # Examples
//!
//! ```
//! use cbus_bridge::event::EventBus;
//! use cbus_bridge::state::{Certainty, StateStore};
//! use cbus_bridge::types::{GroupAddress, Level};
//!
//! let mut store = StateStore::new(EventBus::new());
//! let ga = GroupAddress::new(3);
//!
//! store.update_confirmed(ga, Level::FULL);
//! store.update_assumed(ga, Level::OFF);
//!
//! assert_eq!(store.query(ga).certainty(), Certainty::Assumed);
//! ```

mod device_state;
mod store;

pub use device_state::{Certainty, DeviceState};
pub use store::StateStore;

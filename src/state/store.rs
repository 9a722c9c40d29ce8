// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device state store.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::event::{BridgeEvent, EventBus};
use crate::types::{GroupAddress, Level};

use super::DeviceState;

/// Authoritative and assumed state for every address seen so far.
///
/// The store is owned by the dispatcher, so all mutation happens on one
/// thread of control. A [`BridgeEvent::StateChanged`] is published only
/// when the confirmed level, the certainty or the ramp flag actually
/// changes. Every update method returns whether it published.
///
/// # Examples
///
/// ```
/// use cbus_bridge::event::EventBus;
/// use cbus_bridge::state::{Certainty, StateStore};
/// use cbus_bridge::types::{GroupAddress, Level};
///
/// let mut store = StateStore::new(EventBus::new());
/// let ga = GroupAddress::new(10);
///
/// assert!(store.update_confirmed(ga, Level::new(128)));
/// // Same value again: nothing to publish
/// assert!(!store.update_confirmed(ga, Level::new(128)));
///
/// let state = store.query(ga);
/// assert_eq!(state.confirmed_level(), Some(Level::new(128)));
/// assert_eq!(state.certainty(), Certainty::Confirmed);
/// ```
#[derive(Debug)]
pub struct StateStore {
    devices: HashMap<GroupAddress, DeviceState>,
    events: EventBus,
}

impl StateStore {
    /// Creates an empty store publishing on `events`.
    #[must_use]
    pub fn new(events: EventBus) -> Self {
        Self {
            devices: HashMap::new(),
            events,
        }
    }

    /// Records a level confirmed by the interface for a local command.
    pub fn update_confirmed(&mut self, address: GroupAddress, level: Level) -> bool {
        self.modify(address, |state| state.confirm(level))
    }

    /// Records a confirmed level together with whether a ramp towards it
    /// is still running, as a single change.
    pub fn update_confirmed_with_ramp(
        &mut self,
        address: GroupAddress,
        level: Level,
        ramp_active: bool,
    ) -> bool {
        self.modify(address, |state| {
            state.confirm(level);
            state.set_ramp_active(ramp_active);
        })
    }

    /// Records a level that was asked for but never confirmed.
    ///
    /// The confirmed level is left as it was.
    pub fn update_assumed(&mut self, address: GroupAddress, level: Level) -> bool {
        self.modify(address, |state| state.assume(level))
    }

    /// Records a level reported by the bus without a local command.
    ///
    /// Reports are treated as confirmed: they come from the bus itself.
    pub fn update_from_unsolicited(
        &mut self,
        address: GroupAddress,
        level: Level,
        transition: Duration,
        source: Option<u8>,
    ) -> bool {
        self.modify(address, |state| {
            state.set_target(level, transition);
            state.set_source(source);
            state.confirm(level);
            state.set_ramp_active(!transition.is_zero());
        })
    }

    /// Records the level a new command is heading for.
    ///
    /// Targets are not publish-worthy on their own, so this never publishes.
    pub fn set_target(&mut self, address: GroupAddress, level: Level, transition: Duration) {
        self.modify(address, |state| {
            state.set_target(level, transition);
            state.set_source(None);
        });
    }

    /// Marks a ramp on `address` as running or finished.
    pub fn set_ramp_active(&mut self, address: GroupAddress, active: bool) -> bool {
        self.modify(address, |state| state.set_ramp_active(active))
    }

    /// Returns the state of `address`.
    ///
    /// Unknown addresses yield a default state; the store is not changed.
    #[must_use]
    pub fn query(&self, address: GroupAddress) -> DeviceState {
        self.devices
            .get(&address)
            .cloned()
            .unwrap_or_else(|| DeviceState::new(address))
    }

    /// Returns the state of every tracked address, in address order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<DeviceState> {
        let mut states: Vec<DeviceState> = self.devices.values().cloned().collect();
        states.sort_by_key(DeviceState::address);
        states
    }

    /// Returns `true` if the store has seen `address`.
    #[must_use]
    pub fn contains(&self, address: GroupAddress) -> bool {
        self.devices.contains_key(&address)
    }

    /// Returns the number of tracked addresses.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Returns `true` if no address is tracked yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Subscribes to the change stream.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.events.subscribe()
    }

    fn modify(&mut self, address: GroupAddress, f: impl FnOnce(&mut DeviceState)) -> bool {
        let state = self
            .devices
            .entry(address)
            .or_insert_with(|| DeviceState::new(address));

        let before = state.publish_key();
        f(state);
        state.touch();

        if state.publish_key() == before {
            return false;
        }

        tracing::debug!(
            address = %address,
            level = ?state.confirmed_level().map(|l| l.value()),
            certainty = %state.certainty(),
            ramp_active = state.ramp_active(),
            "Device state changed"
        );
        self.events.publish(BridgeEvent::state_changed(state.clone()));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Certainty;

    fn store() -> (StateStore, broadcast::Receiver<BridgeEvent>) {
        let store = StateStore::new(EventBus::new());
        let rx = store.subscribe();
        (store, rx)
    }

    #[test]
    fn query_unknown_address_does_not_insert() {
        let (store, _rx) = store();
        let state = store.query(GroupAddress::new(3));
        assert_eq!(state.confirmed_level(), None);
        assert!(!store.contains(GroupAddress::new(3)));
        assert!(store.is_empty());
    }

    #[test]
    fn confirmed_update_publishes_once() {
        let (mut store, mut rx) = store();
        let ga = GroupAddress::new(7);

        assert!(store.update_confirmed(ga, Level::FULL));
        assert!(!store.update_confirmed(ga, Level::FULL));

        let event = rx.try_recv().unwrap();
        assert!(event.is_state_change());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn set_target_never_publishes() {
        let (mut store, mut rx) = store();
        let ga = GroupAddress::new(7);

        store.set_target(ga, Level::new(90), Duration::ZERO);
        assert!(rx.try_recv().is_err());
        assert_eq!(store.query(ga).target_level(), Level::new(90));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn assumed_keeps_confirmed_level() {
        let (mut store, _rx) = store();
        let ga = GroupAddress::new(2);

        store.update_confirmed(ga, Level::new(40));
        assert!(store.update_assumed(ga, Level::new(200)));

        let state = store.query(ga);
        assert_eq!(state.confirmed_level(), Some(Level::new(40)));
        assert_eq!(state.target_level(), Level::new(200));
        assert_eq!(state.certainty(), Certainty::Assumed);
        assert_eq!(state.best_level(), Level::new(200));
    }

    #[test]
    fn assumed_on_fresh_address_changes_nothing_publishable() {
        let (mut store, mut rx) = store();
        assert!(!store.update_assumed(GroupAddress::new(2), Level::FULL));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn unsolicited_is_confirmed_grade() {
        let (mut store, mut rx) = store();
        let ga = GroupAddress::new(11);

        store.update_assumed(ga, Level::new(10));
        assert!(store.update_from_unsolicited(ga, Level::new(60), Duration::ZERO, Some(3)));

        let state = store.query(ga);
        assert_eq!(state.certainty(), Certainty::Confirmed);
        assert_eq!(state.confirmed_level(), Some(Level::new(60)));
        assert_eq!(state.target_level(), Level::new(60));
        assert_eq!(state.source(), Some(3));
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn snapshot_lists_tracked_addresses_in_order() {
        let (mut store, _rx) = store();
        store.update_confirmed(GroupAddress::new(40), Level::FULL);
        store.update_confirmed(GroupAddress::new(4), Level::new(10));
        store.set_target(GroupAddress::new(17), Level::new(50), Duration::ZERO);
        let _ = store.query(GroupAddress::new(200));

        let addresses: Vec<u8> = store
            .snapshot()
            .iter()
            .map(|state| state.address().value())
            .collect();
        assert_eq!(addresses, vec![4, 17, 40]);
    }

    #[test]
    fn unsolicited_ramp_sets_ramp_flag() {
        let (mut store, _rx) = store();
        let ga = GroupAddress::new(11);

        store.update_from_unsolicited(ga, Level::new(60), Duration::from_secs(4), None);
        assert!(store.query(ga).ramp_active());

        assert!(store.set_ramp_active(ga, false));
        assert!(!store.set_ramp_active(ga, false));
    }
}

// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fan-out of [`BridgeEvent`]s from the queue task to the front ends.

use tokio::sync::broadcast;

use super::BridgeEvent;

/// Events buffered per subscriber unless configured otherwise.
///
/// Large enough for a state report on every group address after a
/// reconnect, plus the outcomes of a full queue.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Broadcast channel carrying state changes, command outcomes and link
/// status.
///
/// Only the queue task publishes. A subscriber that falls more than the
/// capacity behind loses the oldest events and sees `RecvError::Lagged`;
/// publishing never waits for subscribers.
///
/// # Examples
///
/// ```
/// use cbus_bridge::event::{BridgeEvent, EventBus};
///
/// let bus = EventBus::new();
/// let mut rx = bus.subscribe();
///
/// bus.publish(BridgeEvent::connected());
/// assert!(rx.try_recv().unwrap().is_link());
/// ```
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BridgeEvent>,
}

impl EventBus {
    /// Creates a bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Creates a bus buffering `capacity` events per subscriber.
    ///
    /// Zero is treated as one.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Receives every event published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.sender.subscribe()
    }

    /// Sends `event` to current subscribers. Without subscribers the event
    /// is dropped.
    pub fn publish(&self, event: BridgeEvent) {
        if let Err(broadcast::error::SendError(event)) = self.sender.send(event) {
            tracing::trace!(?event, "No event subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandId;
    use crate::event::CommandOutcome;
    use crate::types::GroupAddress;

    #[test]
    fn publish_without_subscribers_is_fine() {
        EventBus::new().publish(BridgeEvent::disconnected());
    }

    #[test]
    fn late_subscriber_misses_earlier_events() {
        let bus = EventBus::new();
        bus.publish(BridgeEvent::connected());

        let mut rx = bus.subscribe();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn clones_share_one_channel() {
        let bus = EventBus::new();
        let queue_side = bus.clone();
        let mut gateway = bus.subscribe();
        let mut logger = bus.subscribe();

        let ga = GroupAddress::new(12);
        queue_side.publish(BridgeEvent::failed(CommandId::new(3), ga, 4));

        for rx in [&mut gateway, &mut logger] {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.address(), Some(ga));
            assert!(event.is_failure());
        }
    }

    #[test]
    fn slow_subscriber_lags_instead_of_blocking() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        for n in 0..=DEFAULT_EVENT_CAPACITY as u64 {
            bus.publish(BridgeEvent::confirmed(CommandId::new(n), GroupAddress::new(1)));
        }

        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Lagged(1))
        ));
        match rx.try_recv().unwrap() {
            BridgeEvent::CommandResolved { id, outcome, .. } => {
                assert_eq!(id, CommandId::new(1));
                assert_eq!(outcome, CommandOutcome::Confirmed);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn small_bus_keeps_only_the_newest() {
        let bus = EventBus::with_capacity(2);
        let mut rx = bus.subscribe();

        for n in 1..=5 {
            bus.publish(BridgeEvent::failed(CommandId::new(n), GroupAddress::new(n as u8), 1));
        }

        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Lagged(3))
        ));
        assert_eq!(rx.try_recv().unwrap().address(), Some(GroupAddress::new(4)));
        assert_eq!(rx.try_recv().unwrap().address(), Some(GroupAddress::new(5)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn zero_capacity_is_usable() {
        let bus = EventBus::with_capacity(0);
        let mut rx = bus.subscribe();
        bus.publish(BridgeEvent::connected());
        assert!(rx.try_recv().unwrap().is_link());
    }
}

// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Single-writer dispatch engine.

use std::collections::{HashMap, HashSet, VecDeque};

use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::codec::{Confirmation, Decoded, FrameCodec, StatusReport};
use crate::command::{Action, CommandId, CommandIds, LogicalCommand};
use crate::config::QueueConfig;
use crate::event::{BridgeEvent, EventBus};
use crate::ramp::{RampPlan, RampScheduler, RampStep};
use crate::state::{DeviceState, StateStore};
use crate::transport::LinkEvent;
use crate::types::{GroupAddress, RampRate};

use super::pending::{Origin, PendingDispatch, QueuedCommand};
use super::timer::{TimerHeap, TimerKind, TimerToken};

/// A stepped ramp whose final step has not been queued yet.
#[derive(Debug)]
struct ActivePlan {
    id: u64,
    final_command: CommandId,
    timers: Vec<TimerToken>,
}

/// The command queue state machine.
///
/// Owns the queue, the single in-flight attempt, the timer heap and the
/// device state store. It performs no I/O and never reads the clock: every
/// entry point takes the current instant, and frames to send are pulled
/// with [`poll_transmit`](Self::poll_transmit). [`CommandQueue`] drives it
/// from a tokio task.
///
/// At most one attempt is in flight on the link at any time, and at most
/// one command per address is queued or in flight.
///
/// [`CommandQueue`]: super::CommandQueue
///
/// # Examples
///
/// ```
/// use cbus_bridge::codec::PciCodec;
/// use cbus_bridge::command::{Action, CommandId, LogicalCommand};
/// use cbus_bridge::config::QueueConfig;
/// use cbus_bridge::queue::Dispatcher;
/// use cbus_bridge::transport::LinkEvent;
/// use cbus_bridge::types::{GroupAddress, Level};
/// use tokio::time::Instant;
///
/// let mut dispatcher =
///     Dispatcher::new(PciCodec::new(), QueueConfig::default(), Vec::<GroupAddress>::new());
/// let now = Instant::now();
///
/// let ga = GroupAddress::new(10);
/// let cmd = LogicalCommand::new(CommandId::new(1), ga, Action::SetLevel(Level::new(128)), now);
/// dispatcher.enqueue(cmd, now);
///
/// // Nothing goes out while the link is down
/// assert!(dispatcher.poll_transmit(now).is_none());
///
/// dispatcher.handle_link_event(LinkEvent::Connected, now);
/// let frame = dispatcher.poll_transmit(now).unwrap();
///
/// // The interface accepts it: echo the confirmation code with '.'
/// let code = frame[frame.len() - 2];
/// dispatcher.handle_link_event(LinkEvent::Data(vec![code, b'.']), now);
///
/// assert_eq!(dispatcher.state(ga).confirmed_level(), Some(Level::new(128)));
/// ```
#[derive(Debug)]
pub struct Dispatcher<C> {
    codec: C,
    config: QueueConfig,
    scheduler: RampScheduler,
    excluded: HashSet<GroupAddress>,
    ids: CommandIds,
    events: EventBus,
    store: StateStore,

    queue: VecDeque<QueuedCommand>,
    pending: Option<PendingDispatch>,
    timers: TimerHeap,
    plans: HashMap<GroupAddress, ActivePlan>,
    next_plan: u64,
    settling: HashMap<GroupAddress, TimerToken>,

    link_up: bool,
    nonce: u64,
    last_send: Option<Instant>,
    rx_buffer: Vec<u8>,
}

impl<C: FrameCodec> Dispatcher<C> {
    /// Creates a dispatcher.
    ///
    /// # Arguments
    ///
    /// * `codec` - Wire codec for the bus interface
    /// * `config` - Retry, pacing and ramp settings
    /// * `excluded` - Addresses never sent to and never reported on
    #[must_use]
    pub fn new(
        codec: C,
        config: QueueConfig,
        excluded: impl IntoIterator<Item = GroupAddress>,
    ) -> Self {
        let events = EventBus::with_capacity(config.event_capacity);
        Self {
            codec,
            scheduler: RampScheduler::new(config.ramp_steps),
            config,
            excluded: excluded.into_iter().collect(),
            ids: CommandIds::new(),
            store: StateStore::new(events.clone()),
            events,
            queue: VecDeque::new(),
            pending: None,
            timers: TimerHeap::new(),
            plans: HashMap::new(),
            next_plan: 0,
            settling: HashMap::new(),
            link_up: false,
            nonce: 0,
            last_send: None,
            rx_buffer: Vec::new(),
        }
    }

    // ========== Accessors ==========

    /// Returns the id allocator shared with queue handles.
    #[must_use]
    pub fn ids(&self) -> &CommandIds {
        &self.ids
    }

    /// Returns the event bus.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Subscribes to state changes, command outcomes and link changes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.events.subscribe()
    }

    /// Returns the state of `address`.
    #[must_use]
    pub fn state(&self, address: GroupAddress) -> DeviceState {
        self.store.query(address)
    }

    /// Returns the state of every address seen so far, in address order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<DeviceState> {
        self.store.snapshot()
    }

    /// Returns the attempt awaiting confirmation, if any.
    #[must_use]
    pub fn pending(&self) -> Option<&PendingDispatch> {
        self.pending.as_ref()
    }

    /// Returns the number of commands waiting to be sent.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Returns the queued commands in send order.
    pub fn queued(&self) -> impl Iterator<Item = &QueuedCommand> {
        self.queue.iter()
    }

    /// Returns `true` while the transport reports the link as connected.
    #[must_use]
    pub fn is_link_up(&self) -> bool {
        self.link_up
    }

    /// Returns the instant the engine next needs attention, if any.
    pub fn next_wakeup(&mut self) -> Option<Instant> {
        let timer = self.timers.next_deadline();
        let pacing = if self.link_up && self.pending.is_none() && !self.queue.is_empty() {
            self.last_send.map(|last| last + self.config.send_interval)
        } else {
            None
        };
        match (timer, pacing) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    // ========== Enqueue ==========

    /// Accepts a command from the front end.
    ///
    /// Ramps are expanded here. A command for an address that already has
    /// one queued or in flight supersedes it. Never blocks.
    pub fn enqueue(&mut self, command: LogicalCommand, now: Instant) {
        let address = command.address();
        if self.excluded.contains(&address) {
            tracing::debug!(address = %address, command_id = %command.id(), "Dropping command for excluded address");
            return;
        }

        // New intent replaces what is left of a running stepped ramp.
        self.cancel_plan(address, command.id());

        let current = self.store.query(address).best_level();
        self.store.set_target(
            address,
            command.target_level(),
            command.transition_duration(),
        );

        let duration = command.transition_duration();
        let native = self.config.native_ramps && self.codec.supports_native_ramp(duration);

        match self.scheduler.plan(command.action(), current, native) {
            RampPlan::Immediate(action) | RampPlan::Native(action) => {
                self.submit(command.with_action(action), Origin::Direct);
            }
            RampPlan::Stepped(steps) => self.start_plan(&command, &steps, now),
        }
    }

    fn start_plan(&mut self, command: &LogicalCommand, steps: &[RampStep], now: Instant) {
        let address = command.address();

        // Offsets only grow, so the last one decides whether the plan fits
        // on the clock. If not, the target goes out at once.
        let fits = steps
            .last()
            .is_some_and(|step| now.checked_add(step.offset).is_some());
        let steps = if fits {
            steps
        } else {
            tracing::warn!(
                address = %address,
                command_id = %command.id(),
                duration = ?command.transition_duration(),
                "Ramp too long to schedule, setting target directly"
            );
            &steps[steps.len().saturating_sub(1)..]
        };
        let plan = self.next_plan;
        self.next_plan += 1;

        tracing::debug!(
            address = %address,
            command_id = %command.id(),
            steps = steps.len(),
            "Stepping ramp"
        );

        let mut timers = Vec::new();
        let mut immediate = Vec::new();
        for (i, step) in steps.iter().enumerate() {
            let last = i + 1 == steps.len();
            let id = if last { command.id() } else { self.ids.allocate() };
            let step_command = LogicalCommand::new(id, address, step.action(), command.enqueued_at());

            match now.checked_add(step.offset) {
                Some(deadline) if !step.offset.is_zero() => {
                    timers.push(self.timers.schedule(
                        deadline,
                        TimerKind::RampStep {
                            plan,
                            command: step_command,
                            last,
                        },
                    ));
                }
                _ => immediate.push((step_command, last)),
            }
        }

        if !timers.is_empty() {
            self.plans.insert(
                address,
                ActivePlan {
                    id: plan,
                    final_command: command.id(),
                    timers,
                },
            );
        }
        for (step_command, last) in immediate {
            self.submit(step_command, Origin::RampStep { plan, last });
        }
    }

    fn cancel_plan(&mut self, address: GroupAddress, by: CommandId) {
        let Some(plan) = self.plans.remove(&address) else {
            return;
        };
        for token in plan.timers {
            self.timers.cancel(token);
        }
        self.emit(BridgeEvent::superseded(plan.final_command, address, by));
    }

    /// Queues `command`, superseding whatever the address already has.
    fn submit(&mut self, command: LogicalCommand, origin: Origin) {
        let address = command.address();
        let new_id = command.id();

        if let Some(slot) = self
            .queue
            .iter_mut()
            .find(|queued| queued.command.address() == address)
        {
            let old = std::mem::replace(slot, QueuedCommand::new(command, origin));
            self.supersede(&old.command, new_id);
            return;
        }

        if self
            .pending
            .as_ref()
            .is_some_and(|pending| pending.address() == address)
            && let Some(old) = self.pending.take()
        {
            self.timers.cancel(old.timer);
            self.supersede(&old.command, new_id);
            self.queue.push_front(QueuedCommand::new(command, origin));
            return;
        }

        self.queue.push_back(QueuedCommand::new(command, origin));
    }

    fn supersede(&mut self, old: &LogicalCommand, by: CommandId) {
        tracing::debug!(
            address = %old.address(),
            command_id = %old.id(),
            by = %by,
            "Command superseded"
        );
        self.emit(BridgeEvent::superseded(old.id(), old.address(), by));
    }

    // ========== Transmit ==========

    /// Returns the next frame to write to the link, if one may go out now.
    ///
    /// A frame goes out only while the link is up, nothing is in flight and
    /// the minimum send interval has passed.
    pub fn poll_transmit(&mut self, now: Instant) -> Option<Vec<u8>> {
        if !self.link_up || self.pending.is_some() {
            return None;
        }
        if let Some(last) = self.last_send
            && now < last + self.config.send_interval
        {
            return None;
        }

        let queued = self.queue.pop_front()?;
        let attempt = queued.attempts + 1;
        let nonce = self.nonce;
        self.nonce = self.nonce.wrapping_add(1);

        let frame = self.codec.encode(&queued.command, nonce);
        let expected_match_key = self.codec.match_key(&queued.command, nonce);
        let retry_deadline = now + self.config.retry.timeout_for_attempt(attempt);
        let timer = self.timers.schedule(
            retry_deadline,
            TimerKind::Confirmation {
                id: queued.command.id(),
                attempt,
            },
        );

        tracing::debug!(
            address = %queued.command.address(),
            command_id = %queued.command.id(),
            action = queued.command.action().name(),
            attempt,
            "Sending command"
        );

        self.pending = Some(PendingDispatch {
            command: queued.command,
            origin: queued.origin,
            attempt,
            sent_at: now,
            retry_deadline,
            expected_match_key,
            timer,
        });
        self.last_send = Some(now);
        Some(frame)
    }

    // ========== Inbound ==========

    /// Handles a transport event.
    pub fn handle_link_event(&mut self, event: LinkEvent, now: Instant) {
        match event {
            LinkEvent::Connected => {
                if !self.link_up {
                    tracing::info!(queued = self.queue.len(), "Bus link up");
                    self.link_up = true;
                    self.emit(BridgeEvent::connected());
                }
            }
            LinkEvent::Disconnected => self.on_link_down(),
            LinkEvent::Data(bytes) => {
                self.rx_buffer.extend_from_slice(&bytes);
                while let Some(frame) = self.codec.next_frame(&mut self.rx_buffer) {
                    self.handle_frame(&frame, now);
                }
            }
        }
    }

    fn on_link_down(&mut self) {
        if !self.link_up {
            return;
        }
        self.link_up = false;
        self.rx_buffer.clear();

        // The interrupted attempt is not charged; it goes out again first.
        if let Some(pending) = self.pending.take() {
            self.timers.cancel(pending.timer);
            tracing::debug!(
                address = %pending.address(),
                command_id = %pending.command_id(),
                attempt = pending.attempt,
                "Requeueing in-flight command"
            );
            self.queue.push_front(QueuedCommand {
                command: pending.command,
                origin: pending.origin,
                attempts: pending.attempt - 1,
            });
        }

        tracing::info!(queued = self.queue.len(), "Bus link down, dispatch paused");
        self.emit(BridgeEvent::disconnected());
    }

    /// Handles one complete inbound frame.
    pub fn handle_frame(&mut self, frame: &[u8], now: Instant) {
        match self.codec.decode(frame) {
            Ok(Decoded::Confirmation(confirmation)) => self.on_confirmation(confirmation, now),
            Ok(Decoded::Status(reports)) => {
                for report in reports {
                    self.on_status(report, now);
                }
            }
            Ok(Decoded::Unrecognized) => {
                tracing::trace!(frame = %String::from_utf8_lossy(frame), "Ignoring frame");
            }
            Err(e) => {
                tracing::warn!(error = %e, frame = %String::from_utf8_lossy(frame), "Discarding malformed frame");
            }
        }
    }

    fn on_confirmation(&mut self, confirmation: Confirmation, now: Instant) {
        let matched = self
            .pending
            .as_ref()
            .is_some_and(|pending| pending.expected_match_key.matches(&confirmation));
        if !matched {
            tracing::debug!(
                token = confirmation.token,
                "Discarding unmatched confirmation"
            );
            return;
        }
        let Some(pending) = self.pending.take() else {
            return;
        };
        self.timers.cancel(pending.timer);

        if confirmation.accepted {
            self.on_accepted(pending, now);
        } else {
            tracing::warn!(
                address = %pending.address(),
                command_id = %pending.command_id(),
                attempt = pending.attempt,
                "Interface rejected command"
            );
            self.retry_or_fail(pending);
        }
    }

    fn on_accepted(&mut self, pending: PendingDispatch, now: Instant) {
        let command = pending.command;
        let address = command.address();

        tracing::debug!(
            address = %address,
            command_id = %command.id(),
            attempt = pending.attempt,
            latency = ?now.saturating_duration_since(pending.sent_at),
            "Command confirmed"
        );
        self.emit(BridgeEvent::confirmed(command.id(), address));

        let ramping = match (command.action(), pending.origin) {
            (Action::Ramp { duration, .. }, _) if !duration.is_zero() => {
                // The bus runs the native rate the duration was rounded up to.
                let runs_for =
                    RampRate::from_duration(duration).map_or(duration, |rate| rate.duration());
                self.settle_at(address, now + runs_for);
                true
            }
            (_, Origin::RampStep { last: false, .. }) => true,
            _ => {
                if let Some(token) = self.settling.remove(&address) {
                    self.timers.cancel(token);
                }
                false
            }
        };
        self.store
            .update_confirmed_with_ramp(address, command.target_level(), ramping);
    }

    fn on_status(&mut self, report: StatusReport, now: Instant) {
        if self.excluded.contains(&report.address) {
            return;
        }
        tracing::debug!(
            address = %report.address,
            level = report.level.value(),
            source = ?report.source,
            "Bus status report"
        );
        self.store.update_from_unsolicited(
            report.address,
            report.level,
            report.transition,
            report.source,
        );
        if report.transition.is_zero() {
            if let Some(token) = self.settling.remove(&report.address) {
                self.timers.cancel(token);
            }
        } else {
            self.settle_at(report.address, now + report.transition);
        }
    }

    fn settle_at(&mut self, address: GroupAddress, deadline: Instant) {
        let token = self
            .timers
            .schedule(deadline, TimerKind::RampSettled { address });
        if let Some(previous) = self.settling.insert(address, token) {
            self.timers.cancel(previous);
        }
    }

    // ========== Timers ==========

    /// Fires every timer due at `now`.
    pub fn handle_timers(&mut self, now: Instant) {
        while let Some((token, kind)) = self.timers.pop_due(now) {
            match kind {
                TimerKind::Confirmation { id, attempt } => self.on_timeout(id, attempt),
                TimerKind::RampStep {
                    plan,
                    command,
                    last,
                } => self.on_ramp_step(plan, command, last),
                TimerKind::RampSettled { address } => {
                    if self.settling.get(&address) == Some(&token) {
                        self.settling.remove(&address);
                        self.store.set_ramp_active(address, false);
                    }
                }
            }
        }
    }

    fn on_timeout(&mut self, id: CommandId, attempt: u32) {
        let current = self
            .pending
            .as_ref()
            .is_some_and(|pending| pending.command_id() == id && pending.attempt == attempt);
        if !current {
            return;
        }
        let Some(pending) = self.pending.take() else {
            return;
        };
        tracing::warn!(
            address = %pending.address(),
            command_id = %id,
            attempt,
            "Confirmation timed out"
        );
        self.retry_or_fail(pending);
    }

    fn on_ramp_step(&mut self, plan: u64, command: LogicalCommand, last: bool) {
        let address = command.address();
        if !self.plans.get(&address).is_some_and(|active| active.id == plan) {
            return;
        }
        if last {
            self.plans.remove(&address);
        }
        self.submit(command, Origin::RampStep { plan, last });
    }

    fn retry_or_fail(&mut self, pending: PendingDispatch) {
        if self.config.retry.should_retry(pending.attempt) {
            self.queue.push_front(QueuedCommand {
                command: pending.command,
                origin: pending.origin,
                attempts: pending.attempt,
            });
            return;
        }

        let command = pending.command;
        let address = command.address();
        tracing::warn!(
            address = %address,
            command_id = %command.id(),
            attempts = pending.attempt,
            "Command failed, retries exhausted"
        );
        self.emit(BridgeEvent::failed(command.id(), address, pending.attempt));
        self.store.update_assumed(address, command.target_level());
        if !matches!(pending.origin, Origin::RampStep { last: false, .. }) {
            self.store.set_ramp_active(address, false);
        }
    }

    fn emit(&self, event: BridgeEvent) {
        self.events.publish(event);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::codec::PciCodec;
    use crate::config::RetryPolicy;
    use crate::event::CommandOutcome;
    use crate::state::Certainty;
    use crate::types::Level;

    const TIMEOUT: Duration = Duration::from_millis(250);

    fn config() -> QueueConfig {
        QueueConfig::default()
            .with_send_interval(Duration::ZERO)
            .with_retry(RetryPolicy::new().with_timeout(TIMEOUT).with_max_retries(3))
    }

    fn connected(config: QueueConfig) -> (Dispatcher<PciCodec>, broadcast::Receiver<BridgeEvent>, Instant) {
        let mut dispatcher = Dispatcher::new(PciCodec::new(), config, [GroupAddress::new(99)]);
        let rx = dispatcher.subscribe();
        let now = Instant::now();
        dispatcher.handle_link_event(LinkEvent::Connected, now);
        (dispatcher, rx, now)
    }

    fn command(dispatcher: &Dispatcher<PciCodec>, ga: u8, action: Action, now: Instant) -> LogicalCommand {
        LogicalCommand::new(dispatcher.ids().allocate(), GroupAddress::new(ga), action, now)
    }

    fn code(frame: &[u8]) -> u8 {
        frame[frame.len() - 2]
    }

    fn confirm(dispatcher: &mut Dispatcher<PciCodec>, frame: &[u8], now: Instant) {
        dispatcher.handle_link_event(LinkEvent::Data(vec![code(frame), b'.']), now);
    }

    fn drain(rx: &mut broadcast::Receiver<BridgeEvent>) -> Vec<BridgeEvent> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    fn outcomes(events: &[BridgeEvent]) -> Vec<(CommandId, CommandOutcome)> {
        events
            .iter()
            .filter_map(|event| match event {
                BridgeEvent::CommandResolved { id, outcome, .. } => Some((*id, *outcome)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn end_to_end_set_level() {
        let (mut d, mut rx, now) = connected(config());
        drain(&mut rx);
        let cmd = command(&d, 10, Action::SetLevel(Level::new(128)), now);
        let id = cmd.id();

        d.enqueue(cmd, now);
        let frame = d.poll_transmit(now).unwrap();
        assert!(d.poll_transmit(now).is_none());

        confirm(&mut d, &frame, now + Duration::from_millis(20));

        let events = drain(&mut rx);
        assert_eq!(outcomes(&events), vec![(id, CommandOutcome::Confirmed)]);
        assert_eq!(events.iter().filter(|e| e.is_state_change()).count(), 1);

        let state = d.state(GroupAddress::new(10));
        assert_eq!(state.confirmed_level(), Some(Level::new(128)));
        assert_eq!(state.certainty(), Certainty::Confirmed);
        assert!(d.pending().is_none());
    }

    #[test]
    fn one_attempt_in_flight_on_the_link() {
        let (mut d, _rx, now) = connected(config());
        for ga in 1..=3 {
            let cmd = command(&d, ga, Action::On, now);
            d.enqueue(cmd, now);
        }

        let first = d.poll_transmit(now).unwrap();
        let later = now + Duration::from_millis(100);
        assert!(d.poll_transmit(later).is_none());
        assert_eq!(d.pending().unwrap().address(), GroupAddress::new(1));
        assert_eq!(d.queue_len(), 2);

        confirm(&mut d, &first, later);
        assert!(d.pending().is_none());
        assert!(d.poll_transmit(later).is_some());
        assert_eq!(d.pending().unwrap().address(), GroupAddress::new(2));
    }

    #[test]
    fn ramp_to_zero_sends_native_ramp_frame() {
        let (mut d, _rx, now) = connected(config());
        let ramp = |level| Action::Ramp {
            level: Level::new(level),
            duration: Duration::from_secs(10),
        };

        let cmd = command(&d, 4, ramp(0), now);
        d.enqueue(cmd, now);
        let to_zero = d.poll_transmit(now).unwrap();
        confirm(&mut d, &to_zero, now);

        let cmd = command(&d, 4, ramp(200), now);
        d.enqueue(cmd, now);
        let to_200 = d.poll_transmit(now).unwrap();

        assert_eq!(to_zero.len(), to_200.len());
        // Same ramp rate byte for both
        assert_eq!(&to_zero[7..9], &to_200[7..9]);
        assert_eq!(&to_zero[7..9], b"1A");
    }

    #[test]
    fn on_then_off_race_ends_off() {
        let (mut d, mut rx, now) = connected(config());
        let on = command(&d, 5, Action::On, now);
        let off = command(&d, 5, Action::Off, now);
        let (on_id, off_id) = (on.id(), off.id());

        d.enqueue(on, now);
        let on_frame = d.poll_transmit(now).unwrap();
        d.enqueue(off, now);
        assert!(d.pending().is_none());

        let off_frame = d.poll_transmit(now).unwrap();
        // Late confirmation of the superseded On
        confirm(&mut d, &on_frame, now);
        assert!(d.pending().is_some());
        confirm(&mut d, &off_frame, now);

        let outcomes = outcomes(&drain(&mut rx));
        assert_eq!(
            outcomes,
            vec![
                (on_id, CommandOutcome::Superseded { by: off_id }),
                (off_id, CommandOutcome::Confirmed),
            ]
        );
        let state = d.state(GroupAddress::new(5));
        assert_eq!(state.confirmed_level(), Some(Level::OFF));
        assert_eq!(state.certainty(), Certainty::Confirmed);
    }

    #[test]
    fn retries_are_bounded() {
        let (mut d, mut rx, start) = connected(config());
        let cmd = command(&d, 7, Action::SetLevel(Level::new(90)), start);
        d.enqueue(cmd, start);

        let mut now = start;
        let mut sent = 0;
        for _ in 0..10 {
            if d.poll_transmit(now).is_some() {
                sent += 1;
            }
            now += TIMEOUT;
            d.handle_timers(now);
        }

        assert_eq!(sent, 3);
        let events = drain(&mut rx);
        assert_eq!(events.iter().filter(|e| e.is_failure()).count(), 1);
        assert!(matches!(
            outcomes(&events)[..],
            [(_, CommandOutcome::Failed { attempts: 3 })]
        ));

        let state = d.state(GroupAddress::new(7));
        assert_eq!(state.certainty(), Certainty::Assumed);
        assert_eq!(state.target_level(), Level::new(90));
        assert!(d.pending().is_none());
        assert_eq!(d.queue_len(), 0);
    }

    #[test]
    fn stale_confirmation_is_discarded() {
        let (mut d, mut rx, now) = connected(config());
        let cmd = command(&d, 8, Action::On, now);
        d.enqueue(cmd, now);

        let first = d.poll_transmit(now).unwrap();
        let now = now + TIMEOUT;
        d.handle_timers(now);
        let second = d.poll_transmit(now).unwrap();
        assert_ne!(code(&first), code(&second));
        assert_eq!(d.pending().unwrap().attempt(), 2);

        confirm(&mut d, &first, now);
        assert!(d.pending().is_some());
        assert!(outcomes(&drain(&mut rx)).is_empty());

        confirm(&mut d, &second, now);
        assert!(matches!(
            outcomes(&drain(&mut rx))[..],
            [(_, CommandOutcome::Confirmed)]
        ));
    }

    #[test]
    fn stalled_link_coalesces_ramp_steps() {
        let config = config().with_native_ramps(false).with_ramp_steps(5);
        let (mut d, mut rx, start) = connected(config);
        let ga = GroupAddress::new(12);
        let ramp = LogicalCommand::new(
            d.ids().allocate(),
            ga,
            Action::Ramp {
                level: Level::FULL,
                duration: Duration::from_secs(10),
            },
            start,
        );
        let ramp_id = ramp.id();
        d.enqueue(ramp, start);

        // Nothing before the first interval
        assert!(d.poll_transmit(start).is_none());

        // Step 1 goes out after one interval and is confirmed, then the link stalls
        let t1 = start + Duration::from_secs(2);
        d.handle_timers(t1);
        let step1 = d.poll_transmit(t1).unwrap();
        confirm(&mut d, &step1, t1);
        assert!(d.state(ga).ramp_active());
        d.handle_link_event(LinkEvent::Disconnected, t1);

        for secs in [4, 6, 8, 10] {
            d.handle_timers(start + Duration::from_secs(secs));
        }
        assert_eq!(d.queue_len(), 1);

        let now = start + Duration::from_secs(11);
        d.handle_link_event(LinkEvent::Connected, now);
        let last = d.poll_transmit(now).unwrap();
        assert_eq!(&last[7..13], b"020CFF");
        confirm(&mut d, &last, now);

        let outcomes = outcomes(&drain(&mut rx));
        let superseded = outcomes
            .iter()
            .filter(|(_, o)| matches!(o, CommandOutcome::Superseded { .. }))
            .count();
        assert_eq!(superseded, 3);
        assert_eq!(outcomes.last(), Some(&(ramp_id, CommandOutcome::Confirmed)));

        let state = d.state(ga);
        assert_eq!(state.confirmed_level(), Some(Level::FULL));
        assert!(!state.ramp_active());
    }

    #[test]
    fn link_down_does_not_charge_attempt() {
        let (mut d, _rx, now) = connected(config());
        let cmd = command(&d, 3, Action::On, now);
        d.enqueue(cmd, now);
        d.poll_transmit(now).unwrap();

        d.handle_link_event(LinkEvent::Disconnected, now);
        assert!(d.pending().is_none());
        assert_eq!(d.queue_len(), 1);
        assert!(d.poll_transmit(now).is_none());

        // The old timeout must not fire against anything
        d.handle_timers(now + TIMEOUT * 10);
        assert_eq!(d.queue_len(), 1);

        let now = now + TIMEOUT * 10;
        d.handle_link_event(LinkEvent::Connected, now);
        d.poll_transmit(now).unwrap();
        assert_eq!(d.pending().unwrap().attempt(), 1);
    }

    #[test]
    fn rejection_retries_at_once() {
        let (mut d, _rx, now) = connected(config());
        let cmd = command(&d, 3, Action::Off, now);
        d.enqueue(cmd, now);
        let frame = d.poll_transmit(now).unwrap();

        d.handle_link_event(LinkEvent::Data(vec![code(&frame), b'#']), now);
        assert!(d.pending().is_none());
        d.poll_transmit(now).unwrap();
        assert_eq!(d.pending().unwrap().attempt(), 2);
    }

    #[test]
    fn send_interval_spaces_frames() {
        let config = config().with_send_interval(Duration::from_millis(100));
        let (mut d, _rx, now) = connected(config);
        for ga in [1, 2] {
            let cmd = command(&d, ga, Action::On, now);
            d.enqueue(cmd, now);
        }
        let first = d.poll_transmit(now).unwrap();
        confirm(&mut d, &first, now);

        assert!(d.poll_transmit(now + Duration::from_millis(50)).is_none());
        assert_eq!(d.next_wakeup(), Some(now + Duration::from_millis(100)));
        assert!(d.poll_transmit(now + Duration::from_millis(100)).is_some());
    }

    #[test]
    fn excluded_address_is_never_touched() {
        let (mut d, mut rx, now) = connected(config());
        drain(&mut rx);
        let cmd = command(&d, 99, Action::On, now);
        d.enqueue(cmd, now);
        assert_eq!(d.queue_len(), 0);

        // Lighting on, group 99 (0x63), from unit 1
        d.handle_link_event(LinkEvent::Data(b"050138007963E6\r\n".to_vec()), now);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn unsolicited_status_updates_state() {
        let (mut d, mut rx, now) = connected(config());
        drain(&mut rx);
        d.handle_link_event(LinkEvent::Data(b"05013800790A3F\r\n".to_vec()), now);

        let state = d.state(GroupAddress::new(10));
        assert_eq!(state.confirmed_level(), Some(Level::FULL));
        assert_eq!(state.source(), Some(1));
        assert!(drain(&mut rx).iter().any(BridgeEvent::is_state_change));
    }

    #[test]
    fn native_ramp_settles_after_duration() {
        let (mut d, _rx, now) = connected(config());
        let ga = GroupAddress::new(20);
        let cmd = command(
            &d,
            20,
            Action::Ramp {
                level: Level::new(100),
                duration: Duration::from_secs(4),
            },
            now,
        );
        d.enqueue(cmd, now);
        let frame = d.poll_transmit(now).unwrap();
        confirm(&mut d, &frame, now);
        assert!(d.state(ga).ramp_active());

        d.handle_timers(now + Duration::from_secs(3));
        assert!(d.state(ga).ramp_active());
        d.handle_timers(now + Duration::from_secs(4));
        assert!(!d.state(ga).ramp_active());
    }

    #[test]
    fn native_ramp_settles_after_the_rate_actually_sent() {
        let (mut d, _rx, now) = connected(config());
        let ga = GroupAddress::new(21);
        // 10 s goes out as the 12 s rate
        let cmd = command(
            &d,
            21,
            Action::Ramp {
                level: Level::new(100),
                duration: Duration::from_secs(10),
            },
            now,
        );
        d.enqueue(cmd, now);
        let frame = d.poll_transmit(now).unwrap();
        confirm(&mut d, &frame, now);

        d.handle_timers(now + Duration::from_secs(11));
        assert!(d.state(ga).ramp_active());
        d.handle_timers(now + Duration::from_secs(12));
        assert!(!d.state(ga).ramp_active());
    }

    #[test]
    fn ramp_beyond_the_clock_sets_target_directly() {
        let config = config().with_ramp_steps(5);
        let (mut d, mut rx, now) = connected(config);
        let ga = GroupAddress::new(12);
        let ramp = command(
            &d,
            12,
            Action::Ramp {
                level: Level::FULL,
                duration: Duration::from_secs(u64::MAX),
            },
            now,
        );
        let ramp_id = ramp.id();
        d.enqueue(ramp, now);

        let frame = d.poll_transmit(now).unwrap();
        assert_eq!(&frame[7..13], b"020CFF");
        confirm(&mut d, &frame, now);

        assert_eq!(d.next_wakeup(), None);
        assert_eq!(outcomes(&drain(&mut rx)), vec![(ramp_id, CommandOutcome::Confirmed)]);
        assert_eq!(d.state(ga).confirmed_level(), Some(Level::FULL));
        assert!(!d.state(ga).ramp_active());
    }

    #[test]
    fn direct_command_cancels_stepped_ramp() {
        let config = config().with_native_ramps(false).with_ramp_steps(4);
        let (mut d, mut rx, now) = connected(config);
        let ramp = command(
            &d,
            6,
            Action::Ramp {
                level: Level::FULL,
                duration: Duration::from_secs(8),
            },
            now,
        );
        let ramp_id = ramp.id();
        d.enqueue(ramp, now);
        let now = now + Duration::from_secs(2);
        d.handle_timers(now);
        let step = d.poll_transmit(now).unwrap();
        confirm(&mut d, &step, now);

        let off = command(&d, 6, Action::Off, now);
        let off_id = off.id();
        d.enqueue(off, now);
        let frame = d.poll_transmit(now).unwrap();
        confirm(&mut d, &frame, now);

        // No more steps after the Off
        d.handle_timers(now + Duration::from_secs(10));
        assert!(d.poll_transmit(now + Duration::from_secs(10)).is_none());

        let outcomes = outcomes(&drain(&mut rx));
        assert!(outcomes.contains(&(ramp_id, CommandOutcome::Superseded { by: off_id })));
        assert_eq!(d.state(GroupAddress::new(6)).confirmed_level(), Some(Level::OFF));
    }

    #[test]
    fn malformed_frames_do_not_stop_the_stream() {
        let (mut d, mut rx, now) = connected(config());
        let cmd = command(&d, 2, Action::On, now);
        d.enqueue(cmd, now);
        let frame = d.poll_transmit(now).unwrap();

        let mut bytes = b"GARBAGE\r\n".to_vec();
        bytes.extend_from_slice(&[code(&frame), b'.']);
        d.handle_link_event(LinkEvent::Data(bytes), now);

        assert!(matches!(
            outcomes(&drain(&mut rx))[..],
            [(_, CommandOutcome::Confirmed)]
        ));
    }
}

// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end tests of the command queue task with the PCI codec and an
//! in-memory link.

use std::time::Duration;

use cbus_bridge::codec::PciCodec;
use cbus_bridge::command::{Action, CommandId};
use cbus_bridge::config::{QueueConfig, RetryPolicy};
use cbus_bridge::event::{BridgeEvent, CommandOutcome};
use cbus_bridge::queue::{CommandQueue, Dispatcher, QueueHandle};
use cbus_bridge::state::Certainty;
use cbus_bridge::transport::LinkEvent;
use cbus_bridge::types::{GroupAddress, Level};
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(30);

struct Harness {
    queue: QueueHandle,
    link: mpsc::Sender<LinkEvent>,
    frames: mpsc::Receiver<Vec<u8>>,
    events: broadcast::Receiver<BridgeEvent>,
}

impl Harness {
    async fn connected(config: QueueConfig) -> Self {
        let (link, link_rx) = mpsc::channel(16);
        let (frames_tx, frames) = mpsc::channel(16);
        let dispatcher = Dispatcher::new(
            PciCodec::new(),
            config,
            [GroupAddress::new(200)],
        );
        let (queue, _task) = CommandQueue::spawn(dispatcher, link_rx, frames_tx);
        let events = queue.subscribe();
        link.send(LinkEvent::Connected).await.unwrap();

        Self {
            queue,
            link,
            frames,
            events,
        }
    }

    async fn next_frame(&mut self) -> Vec<u8> {
        timeout(WAIT, self.frames.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("frame channel closed")
    }

    async fn reply(&self, frame: &[u8], status: u8) {
        let code = frame[frame.len() - 2];
        self.link
            .send(LinkEvent::Data(vec![code, status]))
            .await
            .unwrap();
    }

    async fn outcome_of(&mut self, id: CommandId) -> CommandOutcome {
        loop {
            let event = timeout(WAIT, self.events.recv())
                .await
                .expect("timed out waiting for an event")
                .expect("event stream closed");
            if let BridgeEvent::CommandResolved {
                id: resolved,
                outcome,
                ..
            } = event
                && resolved == id
            {
                return outcome;
            }
        }
    }
}

fn fast_retries(max_retries: u32) -> QueueConfig {
    QueueConfig::default().with_retry(
        RetryPolicy::new()
            .with_max_retries(max_retries)
            .with_timeout(Duration::from_millis(250)),
    )
}

#[tokio::test(start_paused = true)]
async fn lighting_on_is_confirmed() {
    let mut h = Harness::connected(QueueConfig::default()).await;
    let ga = GroupAddress::new(5);

    let id = h.queue.enqueue(ga, Action::On).unwrap();
    let frame = h.next_frame().await;
    assert_eq!(frame, b"\\053800790545h\r");

    h.reply(&frame, b'.').await;
    assert_eq!(h.outcome_of(id).await, CommandOutcome::Confirmed);

    let state = h.queue.query(ga).await.unwrap();
    assert_eq!(state.confirmed_level(), Some(Level::FULL));
    assert_eq!(state.certainty(), Certainty::Confirmed);
}

#[tokio::test(start_paused = true)]
async fn unanswered_command_fails_after_retry_budget() {
    let mut h = Harness::connected(fast_retries(3)).await;
    let ga = GroupAddress::new(9);

    let id = h
        .queue
        .enqueue(ga, Action::SetLevel(Level::new(99)))
        .unwrap();

    let mut codes = Vec::new();
    for _ in 0..3 {
        let frame = h.next_frame().await;
        codes.push(frame[frame.len() - 2]);
    }
    assert_eq!(codes, vec![b'h', b'i', b'j']);

    assert_eq!(
        h.outcome_of(id).await,
        CommandOutcome::Failed { attempts: 3 }
    );

    let state = h.queue.query(ga).await.unwrap();
    assert_eq!(state.certainty(), Certainty::Assumed);
    assert_eq!(state.confirmed_level(), None);
    assert_eq!(state.best_level(), Level::new(99));
}

#[tokio::test(start_paused = true)]
async fn late_confirmation_for_a_previous_attempt_is_ignored() {
    let mut h = Harness::connected(fast_retries(4)).await;
    let ga = GroupAddress::new(12);

    let id = h.queue.enqueue(ga, Action::Off).unwrap();
    let first = h.next_frame().await;
    let second = h.next_frame().await;

    // The first attempt's code arrives after it timed out
    h.reply(&first, b'.').await;
    h.reply(&second, b'.').await;

    assert_eq!(h.outcome_of(id).await, CommandOutcome::Confirmed);
    let state = h.queue.query(ga).await.unwrap();
    assert_eq!(state.confirmed_level(), Some(Level::OFF));
}

#[tokio::test(start_paused = true)]
async fn newer_command_supersedes_unconfirmed_one() {
    let mut h = Harness::connected(QueueConfig::default()).await;
    let ga = GroupAddress::new(30);

    let on = h.queue.enqueue(ga, Action::On).unwrap();
    let _on_frame = h.next_frame().await;
    let off = h.queue.enqueue(ga, Action::Off).unwrap();

    assert_eq!(
        h.outcome_of(on).await,
        CommandOutcome::Superseded { by: off }
    );

    let off_frame = h.next_frame().await;
    assert!(off_frame.starts_with(b"\\05380001"));
    h.reply(&off_frame, b'.').await;
    assert_eq!(h.outcome_of(off).await, CommandOutcome::Confirmed);

    let state = h.queue.query(ga).await.unwrap();
    assert_eq!(state.confirmed_level(), Some(Level::OFF));
}

#[tokio::test(start_paused = true)]
async fn fade_out_uses_native_ramp() {
    let mut h = Harness::connected(QueueConfig::default()).await;
    let ga = GroupAddress::new(7);

    h.queue
        .enqueue(
            ga,
            Action::Ramp {
                level: Level::OFF,
                duration: Duration::from_secs(10),
            },
        )
        .unwrap();

    let frame = h.next_frame().await;
    // 05 38 00 <rate> <GA> <level>: 12 second rate, level 0
    assert_eq!(&frame[1..13], b"0538001A0700");
}

#[tokio::test(start_paused = true)]
async fn endless_ramp_does_not_stop_the_queue() {
    let mut h = Harness::connected(QueueConfig::default()).await;
    let ga = GroupAddress::new(40);

    let id = h
        .queue
        .enqueue(
            ga,
            Action::Ramp {
                level: Level::new(100),
                duration: Duration::from_secs(u64::MAX),
            },
        )
        .unwrap();

    // Too long to step: the target goes out as a plain level set
    let frame = h.next_frame().await;
    assert_eq!(&frame[7..13], b"022864");
    h.reply(&frame, b'.').await;
    assert_eq!(h.outcome_of(id).await, CommandOutcome::Confirmed);

    assert!(!h.queue.is_closed());
    let state = h.queue.query(ga).await.unwrap();
    assert_eq!(state.confirmed_level(), Some(Level::new(100)));
}

#[tokio::test(start_paused = true)]
async fn bus_report_updates_state_without_a_command() {
    let mut h = Harness::connected(QueueConfig::default()).await;

    h.link
        .send(LinkEvent::Data(b"05013800790A3F\r\n".to_vec()))
        .await
        .unwrap();

    let (address, state) = loop {
        let event = timeout(WAIT, h.events.recv()).await.unwrap().unwrap();
        if let BridgeEvent::StateChanged { address, state } = event {
            break (address, state);
        }
    };
    assert_eq!(address, GroupAddress::new(10));
    assert_eq!(state.confirmed_level(), Some(Level::FULL));
    assert_eq!(state.source(), Some(1));
}

#[tokio::test(start_paused = true)]
async fn excluded_address_is_never_sent() {
    let mut h = Harness::connected(QueueConfig::default()).await;

    h.queue.enqueue(GroupAddress::new(200), Action::On).unwrap();
    h.queue.enqueue(GroupAddress::new(201), Action::On).unwrap();

    let frame = h.next_frame().await;
    // 05 38 00 79 <GA>: group 201 is 0xC9, group 200 never goes out
    assert_eq!(&frame[9..11], b"C9");
    h.reply(&frame, b'.').await;

    assert!(timeout(Duration::from_secs(5), h.frames.recv()).await.is_err());
    assert!(!h.queue.query(GroupAddress::new(200)).await.unwrap().is_on());
}

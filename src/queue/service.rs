// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Async runner for the dispatcher.

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::codec::FrameCodec;
use crate::command::{Action, CommandId, CommandIds, LogicalCommand};
use crate::error::{Error, Result};
use crate::event::{BridgeEvent, EventBus};
use crate::state::DeviceState;
use crate::transport::LinkEvent;
use crate::types::GroupAddress;

use super::Dispatcher;

/// Messages from handles to the engine task.
#[derive(Debug)]
enum Request {
    Enqueue(LogicalCommand),
    Query(GroupAddress, oneshot::Sender<DeviceState>),
    Snapshot(oneshot::Sender<Vec<DeviceState>>),
    Shutdown,
}

/// Spawns the engine task that owns a [`Dispatcher`].
///
/// The task waits on three sources at once: requests from handles, events
/// from the link, and the earliest deadline of the dispatcher. Whichever is
/// ready first is handled, then any frame that may go out is written to the
/// outbound channel.
#[derive(Debug)]
pub struct CommandQueue;

impl CommandQueue {
    /// Starts the engine.
    ///
    /// # Arguments
    ///
    /// * `dispatcher` - The state machine to drive
    /// * `link_events` - Connection changes and inbound bytes from the transport
    /// * `outbound` - Frames for the transport to write
    ///
    /// The task ends on [`QueueHandle::shutdown`], or when the link event
    /// channel or the outbound channel closes.
    pub fn spawn<C: FrameCodec>(
        dispatcher: Dispatcher<C>,
        link_events: mpsc::Receiver<LinkEvent>,
        outbound: mpsc::Sender<Vec<u8>>,
    ) -> (QueueHandle, JoinHandle<()>) {
        let (requests, request_rx) = mpsc::unbounded_channel();
        let handle = QueueHandle {
            requests,
            ids: dispatcher.ids().clone(),
            events: dispatcher.events().clone(),
        };
        let task = tokio::spawn(run(dispatcher, request_rx, link_events, outbound));
        (handle, task)
    }
}

async fn run<C: FrameCodec>(
    mut dispatcher: Dispatcher<C>,
    mut requests: mpsc::UnboundedReceiver<Request>,
    mut link_events: mpsc::Receiver<LinkEvent>,
    outbound: mpsc::Sender<Vec<u8>>,
) {
    tracing::debug!("Command queue started");

    loop {
        let now = Instant::now();
        dispatcher.handle_timers(now);
        if let Some(frame) = dispatcher.poll_transmit(now)
            && outbound.send(frame).await.is_err()
        {
            tracing::error!("Transport is gone, stopping command queue");
            break;
        }

        let wakeup = dispatcher.next_wakeup();

        tokio::select! {
            request = requests.recv() => match request {
                Some(Request::Enqueue(command)) => dispatcher.enqueue(command, Instant::now()),
                Some(Request::Query(address, reply)) => {
                    // The caller may have given up waiting
                    let _ = reply.send(dispatcher.state(address));
                }
                Some(Request::Snapshot(reply)) => {
                    let _ = reply.send(dispatcher.snapshot());
                }
                Some(Request::Shutdown) | None => break,
            },
            event = link_events.recv() => match event {
                Some(event) => dispatcher.handle_link_event(event, Instant::now()),
                None => {
                    tracing::info!("Link event stream closed, stopping command queue");
                    break;
                }
            },
            () = sleep_until(wakeup) => {}
        }
    }

    tracing::debug!(
        queued = dispatcher.queue_len(),
        "Command queue stopped"
    );
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Cloneable handle to a running [`CommandQueue`].
///
/// # Examples
///
/// ```no_run
/// use cbus_bridge::codec::PciCodec;
/// use cbus_bridge::command::Action;
/// use cbus_bridge::config::QueueConfig;
/// use cbus_bridge::queue::{CommandQueue, Dispatcher};
/// use cbus_bridge::types::GroupAddress;
/// use tokio::sync::mpsc;
///
/// # async fn example() -> cbus_bridge::Result<()> {
/// let (_link_tx, link_rx) = mpsc::channel(64);
/// let (out_tx, _out_rx) = mpsc::channel(64);
/// let dispatcher = Dispatcher::new(PciCodec::new(), QueueConfig::default(), Vec::<GroupAddress>::new());
/// let (queue, _task) = CommandQueue::spawn(dispatcher, link_rx, out_tx);
///
/// let id = queue.enqueue(GroupAddress::new(5), Action::On)?;
/// let state = queue.query(GroupAddress::new(5)).await?;
/// println!("{id}: {:?}", state.target_level());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct QueueHandle {
    requests: mpsc::UnboundedSender<Request>,
    ids: CommandIds,
    events: EventBus,
}

impl QueueHandle {
    /// Submits a command and returns its id. Never blocks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueClosed`] if the engine task has stopped.
    pub fn enqueue(&self, address: GroupAddress, action: Action) -> Result<CommandId> {
        let id = self.ids.allocate();
        let command = LogicalCommand::new(id, address, action, Instant::now());
        tracing::debug!(
            address = %address,
            command_id = %id,
            action = action.name(),
            "Enqueueing command"
        );
        self.requests
            .send(Request::Enqueue(command))
            .map_err(|_| Error::QueueClosed)?;
        Ok(id)
    }

    /// Returns the current state of `address`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueClosed`] if the engine task has stopped.
    pub async fn query(&self, address: GroupAddress) -> Result<DeviceState> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(Request::Query(address, reply))
            .map_err(|_| Error::QueueClosed)?;
        response.await.map_err(|_| Error::QueueClosed)
    }

    /// Returns the state of every address the engine has seen, in address
    /// order.
    ///
    /// Used to resynchronise a subscriber that lagged behind the event
    /// stream.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueClosed`] if the engine task has stopped.
    pub async fn snapshot(&self) -> Result<Vec<DeviceState>> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(Request::Snapshot(reply))
            .map_err(|_| Error::QueueClosed)?;
        response.await.map_err(|_| Error::QueueClosed)
    }

    /// Subscribes to the engine's events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.events.subscribe()
    }

    /// Asks the engine task to stop. Queued commands are dropped.
    pub fn shutdown(&self) {
        let _ = self.requests.send(Request::Shutdown);
    }

    /// Returns `true` once the engine task has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.requests.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::codec::PciCodec;
    use crate::config::QueueConfig;
    use crate::types::Level;

    fn spawn() -> (
        QueueHandle,
        mpsc::Sender<LinkEvent>,
        mpsc::Receiver<Vec<u8>>,
    ) {
        let (link_tx, link_rx) = mpsc::channel(16);
        let (out_tx, out_rx) = mpsc::channel(16);
        let dispatcher = Dispatcher::new(PciCodec::new(), QueueConfig::default(), Vec::<GroupAddress>::new());
        let (handle, _task) = CommandQueue::spawn(dispatcher, link_rx, out_tx);
        (handle, link_tx, out_rx)
    }

    #[tokio::test(start_paused = true)]
    async fn query_reflects_enqueued_target() {
        let (queue, _link, _out) = spawn();
        queue
            .enqueue(GroupAddress::new(3), Action::SetLevel(Level::new(40)))
            .unwrap();

        let state = queue.query(GroupAddress::new(3)).await.unwrap();
        assert_eq!(state.target_level(), Level::new(40));
        assert_eq!(state.confirmed_level(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_covers_every_commanded_address() {
        let (queue, _link, _out) = spawn();
        queue.enqueue(GroupAddress::new(9), Action::On).unwrap();
        queue.enqueue(GroupAddress::new(2), Action::Off).unwrap();

        let states = queue.snapshot().await.unwrap();
        let addresses: Vec<_> = states.iter().map(DeviceState::address).collect();
        assert_eq!(addresses, vec![GroupAddress::new(2), GroupAddress::new(9)]);
        assert_eq!(states[1].target_level(), Level::FULL);
    }

    #[tokio::test(start_paused = true)]
    async fn frames_wait_for_the_link() {
        let (queue, link, mut out) = spawn();
        queue.enqueue(GroupAddress::new(3), Action::On).unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(out.try_recv().is_err());

        link.send(LinkEvent::Connected).await.unwrap();
        let frame = tokio::time::timeout(Duration::from_secs(1), out.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(frame.starts_with(b"\\05380079"));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_closes_handle() {
        let (queue, _link, _out) = spawn();
        queue.shutdown();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(queue.is_closed());
        assert!(matches!(
            queue.enqueue(GroupAddress::new(1), Action::Off),
            Err(Error::QueueClosed)
        ));
    }
}

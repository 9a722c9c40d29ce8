// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Reconnecting link supervisor.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::ReconnectionPolicy;
use crate::error::ProtocolError;

use super::session::{self, Session};
use super::{LinkConfig, LinkEvent};

/// Why a session ended.
enum SessionEnd {
    /// The connection dropped; try again.
    LinkLost,
    /// The command queue went away; stop.
    QueueGone,
}

/// Keeps the bus link open.
///
/// Opens the link, writes the handshake, reports
/// [`LinkEvent::Connected`], then shuttles bytes both ways until the link
/// drops. After a drop it reports [`LinkEvent::Disconnected`] and re-opens
/// the link according to its [`ReconnectionPolicy`]. Frames that were
/// waiting for the link while it was down are discarded, since the queue
/// resends whatever is still unconfirmed.
///
/// # Examples
///
/// ```no_run
/// use cbus_bridge::codec::{FrameCodec, PciCodec};
/// use cbus_bridge::config::ReconnectionPolicy;
/// use cbus_bridge::transport::{LinkConfig, LinkSupervisor};
/// use tokio::sync::mpsc;
///
/// # async fn example() {
/// let (events_tx, _events_rx) = mpsc::channel(64);
/// let (_frames_tx, frames_rx) = mpsc::channel(64);
///
/// let supervisor = LinkSupervisor::new(
///     LinkConfig::tcp("192.0.2.10:10001"),
///     ReconnectionPolicy::default(),
///     PciCodec::new().handshake(),
/// );
/// let task = supervisor.spawn(events_tx, frames_rx);
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct LinkSupervisor {
    config: LinkConfig,
    policy: ReconnectionPolicy,
    handshake: Vec<Vec<u8>>,
}

impl LinkSupervisor {
    /// Creates a supervisor.
    #[must_use]
    pub fn new(config: LinkConfig, policy: ReconnectionPolicy, handshake: Vec<Vec<u8>>) -> Self {
        Self {
            config,
            policy,
            handshake,
        }
    }

    /// Runs the supervisor on a tokio task.
    ///
    /// The task ends with `Ok` when either channel closes, and with
    /// `ProtocolError::LinkDown` when the reconnection policy gives up.
    pub fn spawn(
        self,
        events: mpsc::Sender<LinkEvent>,
        outbound: mpsc::Receiver<Vec<u8>>,
    ) -> JoinHandle<Result<(), ProtocolError>> {
        tokio::spawn(self.run(events, outbound))
    }

    async fn run(
        self,
        events: mpsc::Sender<LinkEvent>,
        mut outbound: mpsc::Receiver<Vec<u8>>,
    ) -> Result<(), ProtocolError> {
        let mut failures: u32 = 0;

        loop {
            match session::open(&self.config).await {
                Ok(session) => {
                    failures = 0;
                    tracing::info!(link = %self.config, "Connected to bus interface");

                    let end = self.serve(session, &events, &mut outbound).await;
                    if events.send(LinkEvent::Disconnected).await.is_err() {
                        return Ok(());
                    }
                    match end {
                        SessionEnd::QueueGone => return Ok(()),
                        SessionEnd::LinkLost => {
                            tracing::warn!(link = %self.config, "Lost connection to bus interface");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        link = %self.config,
                        error = %e,
                        attempt = failures + 1,
                        "Cannot open bus link"
                    );
                    failures += 1;
                }
            }

            if !self.policy.should_retry(failures) {
                tracing::error!(link = %self.config, attempts = failures, "Giving up on bus link");
                return Err(ProtocolError::LinkDown);
            }

            let delay = self.policy.delay_after_failures(failures);
            tracing::debug!(delay = ?delay, "Waiting before reconnecting");
            tokio::time::sleep(delay).await;

            if events.is_closed() {
                return Ok(());
            }
        }
    }

    async fn serve(
        &self,
        mut session: Session,
        events: &mpsc::Sender<LinkEvent>,
        outbound: &mut mpsc::Receiver<Vec<u8>>,
    ) -> SessionEnd {
        // Anything queued before this session belongs to a dead link.
        let mut stale = 0usize;
        while outbound.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            tracing::debug!(frames = stale, "Discarded stale outbound frames");
        }

        for frame in &self.handshake {
            if session.outbound.send(frame.clone()).await.is_err() {
                return SessionEnd::LinkLost;
            }
        }
        if events.send(LinkEvent::Connected).await.is_err() {
            return SessionEnd::QueueGone;
        }

        loop {
            tokio::select! {
                data = session.inbound.recv() => match data {
                    Some(bytes) => {
                        if events.send(LinkEvent::Data(bytes)).await.is_err() {
                            return SessionEnd::QueueGone;
                        }
                    }
                    None => return SessionEnd::LinkLost,
                },
                frame = outbound.recv() => match frame {
                    Some(frame) => {
                        if session.outbound.send(frame).await.is_err() {
                            return SessionEnd::LinkLost;
                        }
                    }
                    None => return SessionEnd::QueueGone,
                },
            }
        }
    }
}

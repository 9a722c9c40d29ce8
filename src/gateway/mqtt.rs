// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MQTT client side of the gateway.
//!
//! Two tasks share one [`AsyncClient`]:
//!
//! ```text
//! broker ──> event loop task ──parse──> QueueHandle::enqueue
//!                  │
//!            connected flag
//!                  ↓
//! BridgeEvent ──> publisher task ──> discovery / state / link status
//! ```
//!
//! The event loop task only reads; all publishing happens on the publisher
//! task so a full client request channel never stalls the event loop.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, TlsConfiguration, Transport};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::command::{Action, CommandId};
use crate::config::{DeviceKinds, ReconnectionPolicy};
use crate::error::{ConfigError, Error, ProtocolError};
use crate::event::{BridgeEvent, CommandOutcome};
use crate::queue::QueueHandle;
use crate::state::DeviceState;
use crate::types::GroupAddress;

use super::discovery::discovery_messages;
use super::payload::{parse_command, state_payload};
use super::topics::{BRIDGE_TOPIC, COMMAND_FILTERS, Component, parse_set_topic};

/// Default MQTT port.
pub const DEFAULT_PORT: u16 = 1883;

/// Default MQTT port with TLS.
pub const DEFAULT_TLS_PORT: u16 = 8883;

/// Default keep-alive interval.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// TLS material for the broker connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    /// PEM file with the CA certificates to trust.
    pub ca: PathBuf,
    /// PEM client certificate and key, for client authentication.
    pub client_auth: Option<(PathBuf, PathBuf)>,
}

/// Broker connection settings.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use cbus_bridge::gateway::BrokerConfig;
///
/// let config = BrokerConfig::new("broker.local")
///     .with_keep_alive(Duration::from_secs(30))
///     .with_credentials("bridge", "secret");
///
/// assert_eq!(config.port(), 1883);
/// ```
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    host: String,
    port: Option<u16>,
    keep_alive: Duration,
    credentials: Option<(String, String)>,
    tls: Option<TlsFiles>,
    client_id: Option<String>,
    reconnection: ReconnectionPolicy,
}

impl BrokerConfig {
    /// Creates settings for the broker at `host`.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            keep_alive: DEFAULT_KEEP_ALIVE,
            credentials: None,
            tls: None,
            client_id: None,
            reconnection: ReconnectionPolicy::default(),
        }
    }

    /// Sets the port. Without one, the default for the transport is used.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the keep-alive interval.
    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Sets the username and password.
    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    /// Enables TLS.
    #[must_use]
    pub fn with_tls(mut self, tls: TlsFiles) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Sets a fixed client id.
    #[must_use]
    pub fn with_client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    /// Sets the policy for waiting between broker reconnects.
    #[must_use]
    pub fn with_reconnection(mut self, policy: ReconnectionPolicy) -> Self {
        self.reconnection = policy;
        self
    }

    /// Returns the broker host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the effective port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(if self.tls.is_some() {
            DEFAULT_TLS_PORT
        } else {
            DEFAULT_PORT
        })
    }

    /// Returns `true` if TLS is enabled.
    #[must_use]
    pub fn uses_tls(&self) -> bool {
        self.tls.is_some()
    }

    fn mqtt_options(&self) -> Result<MqttOptions, ConfigError> {
        let client_id = self
            .client_id
            .clone()
            .unwrap_or_else(|| format!("cbus-bridge-{}", uuid::Uuid::new_v4().simple()));

        let mut options = MqttOptions::new(client_id, &self.host, self.port());
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);

        if let Some((username, password)) = &self.credentials {
            options.set_credentials(username, password);
        }

        if let Some(tls) = &self.tls {
            let ca = read_file(&tls.ca)?;
            let client_auth = match &tls.client_auth {
                Some((cert, key)) => Some((read_file(cert)?, read_file(key)?)),
                None => None,
            };
            options.set_transport(Transport::tls_with_config(TlsConfiguration::Simple {
                ca,
                alpn: None,
                client_auth,
            }));
        }

        Ok(options)
    }
}

/// Reads broker credentials from a file.
///
/// The first line is the username and the second the password. Surrounding
/// whitespace is trimmed.
///
/// # Errors
///
/// Returns [`ConfigError::Unreadable`] if the file cannot be read and
/// [`ConfigError::InvalidCredentials`] if either line is missing.
pub fn read_credentials(path: &Path) -> Result<(String, String), ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    let mut lines = text.lines().map(str::trim);

    match (lines.next(), lines.next()) {
        (Some(username), Some(password)) if !username.is_empty() => {
            Ok((username.to_string(), password.to_string()))
        }
        _ => Err(ConfigError::InvalidCredentials(path.to_path_buf())),
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, ConfigError> {
    std::fs::read(path).map_err(|source| ConfigError::Unreadable {
        path: path.to_path_buf(),
        source,
    })
}

/// Running MQTT front end.
#[derive(Debug)]
pub struct MqttGateway {
    client: AsyncClient,
    connected: watch::Receiver<bool>,
    event_task: JoinHandle<()>,
    publish_task: JoinHandle<()>,
}

impl MqttGateway {
    /// Starts the gateway for `queue`.
    ///
    /// The broker connection is made in the background and re-made after
    /// every loss. On each connect the gateway subscribes to the command
    /// topics, publishes discovery for every exposed address and
    /// republishes the state of every address seen so far.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if TLS material cannot be read.
    pub fn start(
        config: &BrokerConfig,
        kinds: DeviceKinds,
        queue: QueueHandle,
    ) -> Result<Self, ConfigError> {
        let options = config.mqtt_options()?;
        let (client, event_loop) = AsyncClient::new(options, 10);
        let (connected_tx, connected) = watch::channel(false);
        let kinds = Arc::new(kinds);

        tracing::info!(
            host = %config.host(),
            port = config.port(),
            tls = config.uses_tls(),
            "Starting MQTT gateway"
        );

        let publisher = Publisher {
            client: client.clone(),
            kinds: Arc::clone(&kinds),
            queue: queue.clone(),
            link_up: None,
        };
        let publish_task = tokio::spawn(publisher.run(connected.clone(), queue.subscribe()));

        let event_task = tokio::spawn(handle_mqtt_events(
            event_loop,
            kinds,
            queue,
            connected_tx,
            config.reconnection.clone(),
        ));

        Ok(Self {
            client,
            connected,
            event_task,
            publish_task,
        })
    }

    /// Returns `true` while the broker connection is up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Waits until the broker connection is up.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::ChannelClosed`] if the gateway stopped.
    pub async fn wait_connected(&self) -> Result<(), ProtocolError> {
        let mut connected = self.connected.clone();
        connected
            .wait_for(|up| *up)
            .await
            .map(|_| ())
            .map_err(|_| ProtocolError::ChannelClosed("MQTT gateway stopped".to_string()))
    }

    /// Returns `true` once both gateway tasks have ended.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.event_task.is_finished() && self.publish_task.is_finished()
    }

    /// Disconnects from the broker and stops the gateway.
    pub async fn shutdown(self) {
        if let Err(e) = self.client.disconnect().await {
            tracing::debug!(error = %e, "MQTT disconnect failed");
        }
        self.event_task.abort();
        self.publish_task.abort();
    }
}

/// Maps an incoming publish to a command.
///
/// Returns `Ok(None)` for addresses that do not take commands.
///
/// # Errors
///
/// Returns an error if the topic or payload cannot be parsed.
pub fn route_command(
    topic: &str,
    payload: &[u8],
    kinds: &DeviceKinds,
) -> Result<Option<(GroupAddress, Action)>, Error> {
    let address = parse_set_topic(topic)?;
    let kind = kinds.kind(address);
    if !kind.accepts_commands() {
        tracing::info!(address = %address, kind = %kind, "Ignoring command for read-only device");
        return Ok(None);
    }
    parse_command(payload, kind).map(|action| Some((address, action)))
}

fn submit_command(
    topic: &str,
    payload: &[u8],
    kinds: &DeviceKinds,
    queue: &QueueHandle,
) -> Result<Option<CommandId>, Error> {
    match route_command(topic, payload, kinds)? {
        Some((address, action)) => queue.enqueue(address, action).map(Some),
        None => Ok(None),
    }
}

/// Drives the client event loop and turns command publishes into queue
/// submissions.
async fn handle_mqtt_events(
    mut event_loop: EventLoop,
    kinds: Arc<DeviceKinds>,
    queue: QueueHandle,
    connected: watch::Sender<bool>,
    policy: ReconnectionPolicy,
) {
    let mut failures: u32 = 0;

    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                failures = 0;
                tracing::info!(code = ?connack.code, "Connected to MQTT broker");
                connected.send_replace(true);
            }
            Ok(Event::Incoming(Packet::SubAck(suback))) => {
                tracing::debug!(?suback, "MQTT subscription acknowledged");
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                match submit_command(&publish.topic, &publish.payload, &kinds, &queue) {
                    Ok(Some(id)) => {
                        tracing::debug!(topic = %publish.topic, command_id = %id, "Command accepted");
                    }
                    Ok(None) => {}
                    Err(Error::QueueClosed) => {
                        tracing::info!("Command queue stopped, leaving MQTT event loop");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(topic = %publish.topic, error = %e, "Rejected MQTT command");
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                if connected.send_replace(false) {
                    tracing::warn!(error = %e, "Lost connection to MQTT broker");
                } else {
                    tracing::warn!(error = %e, attempt = failures + 1, "Cannot connect to MQTT broker");
                }

                failures += 1;
                if !policy.should_retry(failures) {
                    tracing::error!(attempts = failures, "Giving up on MQTT broker");
                    break;
                }
                tokio::time::sleep(policy.delay_after_failures(failures)).await;
            }
        }
    }
}

/// Publishes discovery, state and link status.
struct Publisher {
    client: AsyncClient,
    kinds: Arc<DeviceKinds>,
    queue: QueueHandle,
    link_up: Option<bool>,
}

impl Publisher {
    async fn run(
        mut self,
        mut connected: watch::Receiver<bool>,
        mut events: broadcast::Receiver<BridgeEvent>,
    ) {
        loop {
            tokio::select! {
                changed = connected.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let up = *connected.borrow_and_update();
                    if up && let Err(e) = self.announce().await {
                        tracing::warn!(error = %e, "Failed to announce devices");
                    }
                }
                event = events.recv() => match event {
                    Ok(event) => {
                        if let Err(e) = self.handle_event(event).await {
                            tracing::warn!(error = %e, "Failed to publish state");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "State publisher lagged behind, republishing all states");
                        if let Err(e) = self.republish_states().await {
                            tracing::warn!(error = %e, "Failed to republish states");
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    }

    async fn announce(&self) -> Result<(), Error> {
        for filter in COMMAND_FILTERS {
            self.client
                .subscribe(filter, QoS::AtLeastOnce)
                .await
                .map_err(ProtocolError::from)?;
        }

        let messages = discovery_messages(&self.kinds);
        tracing::info!(entities = messages.len(), "Publishing discovery");
        for message in messages {
            self.client
                .publish(message.topic, QoS::AtLeastOnce, true, message.payload.to_string())
                .await
                .map_err(ProtocolError::from)?;
        }

        if let Some(up) = self.link_up {
            self.publish_link(up).await?;
        }
        self.republish_states().await
    }

    /// Publishes the stored state of every address seen so far.
    async fn republish_states(&self) -> Result<(), Error> {
        let states = self.queue.snapshot().await?;
        tracing::debug!(devices = states.len(), "Republishing device states");
        for state in &states {
            self.publish_state(state).await?;
        }
        Ok(())
    }

    async fn handle_event(&mut self, event: BridgeEvent) -> Result<(), Error> {
        match event {
            BridgeEvent::StateChanged { state, .. } => self.publish_state(&state).await?,
            BridgeEvent::CommandResolved {
                address,
                outcome: CommandOutcome::Failed { .. },
                ..
            } => {
                // Failure leaves the assumed level in place, which may not
                // have changed the published fields.
                let state = self.queue.query(address).await?;
                self.publish_state(&state).await?;
            }
            BridgeEvent::CommandResolved { .. } => {}
            BridgeEvent::LinkChanged { connected } => {
                self.link_up = Some(connected);
                self.publish_link(connected).await?;
            }
        }
        Ok(())
    }

    async fn publish_state(&self, state: &DeviceState) -> Result<(), ProtocolError> {
        let address = state.address();
        let kind = self.kinds.kind(address);
        let (Some(component), Some(payload)) =
            (Component::for_kind(kind), state_payload(state, kind))
        else {
            return Ok(());
        };

        let topic = component.state_topic(address);
        tracing::debug!(topic = %topic, payload = %payload, "Publishing state");
        self.client
            .publish(topic, QoS::AtLeastOnce, true, payload)
            .await?;
        Ok(())
    }

    async fn publish_link(&self, up: bool) -> Result<(), ProtocolError> {
        let payload = if up { "ON" } else { "OFF" };
        self.client
            .publish(format!("{BRIDGE_TOPIC}/state"), QoS::AtLeastOnce, true, payload)
            .await?;
        Ok(())
    }
}

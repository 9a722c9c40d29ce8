// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `cbus-bridge` daemon: C-Bus PCI/CNI to Home Assistant over MQTT.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use cbus_bridge::codec::{FrameCodec, PciCodec};
use cbus_bridge::config::{BridgeConfig, DeviceKinds, QueueConfig, RetryPolicy};
use cbus_bridge::error::ConfigError;
use cbus_bridge::gateway::{BrokerConfig, MqttGateway, TlsFiles, read_credentials};
use cbus_bridge::queue::{CommandQueue, Dispatcher};
use cbus_bridge::transport::{LinkConfig, LinkSupervisor};
use clap::{ArgGroup, Parser, ValueEnum};
use tokio::sync::mpsc;

const LINK_CHANNEL_CAPACITY: usize = 64;

/// Bridges a C-Bus lighting network to Home Assistant through MQTT.
#[derive(Parser, Debug)]
#[command(name = "cbus-bridge")]
#[command(author, version, about, long_about = None)]
#[command(group(ArgGroup::new("link").required(true).args(["serial", "tcp"])))]
struct Args {
    // ========== Bus interface ==========
    /// Serial device the PCI is attached to (e.g. /dev/ttyUSB0).
    #[arg(short, long, value_name = "DEVICE")]
    serial: Option<PathBuf>,

    /// Address of a CNI or networked PCI (e.g. 192.0.2.1:10001).
    #[arg(short, long, value_name = "ADDR:PORT")]
    tcp: Option<String>,

    // ========== MQTT broker ==========
    /// Address of the MQTT broker.
    #[arg(short = 'b', long)]
    broker_address: String,

    /// Broker port [default: 1883, or 8883 with TLS].
    #[arg(short = 'p', long)]
    broker_port: Option<u16>,

    /// Keep-alive interval in seconds.
    #[arg(long, value_name = "SECONDS", default_value_t = 60)]
    broker_keepalive: u64,

    /// File with the broker username on the first line and password on the second.
    #[arg(short = 'A', long, value_name = "FILE")]
    broker_auth: Option<PathBuf>,

    /// PEM file with CA certificates to trust. Enables TLS.
    #[arg(short = 'c', long, value_name = "FILE")]
    broker_ca: Option<PathBuf>,

    /// PEM client certificate. Requires --broker-client-key.
    #[arg(short = 'k', long, value_name = "FILE", requires = "broker_ca")]
    broker_client_cert: Option<PathBuf>,

    /// PEM client key. Requires --broker-client-cert.
    #[arg(short = 'K', long, value_name = "FILE", requires = "broker_ca")]
    broker_client_key: Option<PathBuf>,

    // ========== Device kinds ==========
    /// Comma-separated group addresses of non-dimmable lights (e.g. "26,65,81").
    #[arg(long, value_name = "LIST", default_value = "")]
    non_dimmable_lights: String,

    /// Comma-separated group addresses of switches.
    #[arg(long, value_name = "LIST", default_value = "")]
    switches: String,

    /// Comma-separated group addresses of read-only binary sensors.
    #[arg(long, value_name = "LIST", default_value = "")]
    binary_sensors: String,

    /// Comma-separated group addresses to leave alone entirely.
    #[arg(long, value_name = "LIST", default_value = "")]
    ignore: String,

    // ========== Command queue ==========
    /// Total send attempts per command.
    #[arg(long, default_value_t = 4)]
    max_retries: u32,

    /// Confirmation timeout of the first attempt, in milliseconds.
    #[arg(long, value_name = "MS", default_value_t = 250)]
    confirm_timeout_ms: u64,

    /// Confirmation timeout multiplier per further attempt.
    #[arg(long, default_value_t = 1.0)]
    retry_backoff: f32,

    /// Minimum spacing between frames, in milliseconds.
    #[arg(long, value_name = "MS", default_value_t = 100)]
    send_interval_ms: u64,

    /// Number of steps for ramps the interface cannot run itself.
    #[arg(long, default_value_t = 10)]
    ramp_steps: u32,

    /// Always step ramps instead of using native ramp rates.
    #[arg(long)]
    no_native_ramps: bool,

    // ========== Logging ==========
    /// Log verbosity. RUST_LOG overrides it.
    #[arg(short, long, value_enum, default_value_t = Verbosity::Info)]
    verbosity: Verbosity,

    /// Emit logs as JSON.
    #[arg(long)]
    json_logs: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Verbosity {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Verbosity {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

impl Args {
    fn link(&self) -> Result<LinkConfig, ConfigError> {
        match (&self.serial, &self.tcp) {
            (Some(path), None) => Ok(LinkConfig::serial(path.clone())),
            (None, Some(addr)) => Ok(LinkConfig::tcp(addr.clone())),
            // clap enforces exactly one
            _ => Err(ConfigError::InvalidLinkAddress(String::new())),
        }
    }

    fn bridge_config(&self) -> Result<BridgeConfig, ConfigError> {
        let (devices, invalid) = DeviceKinds::from_lists(
            &self.non_dimmable_lights,
            &self.switches,
            &self.binary_sensors,
            &self.ignore,
        );
        for error in invalid {
            tracing::warn!(error = %error, "Skipping invalid group address");
        }

        let retry = RetryPolicy::new()
            .with_max_retries(self.max_retries)
            .with_timeout(Duration::from_millis(self.confirm_timeout_ms))
            .with_backoff_multiplier(self.retry_backoff);
        let queue = QueueConfig::default()
            .with_retry(retry)
            .with_send_interval(Duration::from_millis(self.send_interval_ms))
            .with_ramp_steps(self.ramp_steps)
            .with_native_ramps(!self.no_native_ramps);

        Ok(BridgeConfig::new(self.link()?)
            .with_queue(queue)
            .with_devices(devices))
    }

    fn broker_config(&self) -> Result<BrokerConfig, ConfigError> {
        let mut config = BrokerConfig::new(&self.broker_address)
            .with_keep_alive(Duration::from_secs(self.broker_keepalive));

        if let Some(port) = self.broker_port {
            config = config.with_port(port);
        }

        if let Some(path) = &self.broker_auth {
            let (username, password) = read_credentials(path)?;
            config = config.with_credentials(username, password);
        }

        let client_auth = match (&self.broker_client_cert, &self.broker_client_key) {
            (Some(cert), Some(key)) => Some((cert.clone(), key.clone())),
            (None, None) => None,
            _ => return Err(ConfigError::IncompleteClientAuth),
        };

        if let Some(ca) = &self.broker_ca {
            config = config.with_tls(TlsFiles {
                ca: ca.clone(),
                client_auth,
            });
        } else {
            tracing::warn!("Transport security disabled, pass --broker-ca to enable TLS");
        }

        Ok(config)
    }
}

fn init_logging(verbosity: Verbosity, json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(verbosity.as_str()));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbosity, args.json_logs);

    let bridge = args.bridge_config().context("invalid bridge configuration")?;
    let broker = args.broker_config().context("invalid broker configuration")?;
    bridge.validate().context("invalid bus link")?;

    run(bridge, broker).await
}

async fn run(bridge: BridgeConfig, broker: BrokerConfig) -> Result<()> {
    let codec = PciCodec::new();
    let handshake = codec.handshake();
    let dispatcher = Dispatcher::new(codec, bridge.queue.clone(), bridge.devices.excluded());

    let (link_tx, link_rx) = mpsc::channel(LINK_CHANNEL_CAPACITY);
    let (frames_tx, frames_rx) = mpsc::channel(LINK_CHANNEL_CAPACITY);
    let (queue, engine) = CommandQueue::spawn(dispatcher, link_rx, frames_tx);

    // Subscribe before the link starts so the first link event is seen
    let gateway = MqttGateway::start(&broker, bridge.devices.clone(), queue.clone())
        .context("cannot start MQTT gateway")?;

    let link = LinkSupervisor::new(bridge.link.clone(), bridge.reconnection.clone(), handshake)
        .spawn(link_tx, frames_rx);

    tracing::info!(link = %bridge.link, "Bridge running");

    let outcome = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("cannot listen for shutdown signal")?;
            tracing::info!("Shutting down");
            Ok(())
        }
        result = link => match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e).context("bus link failed"),
            Err(e) => Err(e).context("bus link task panicked"),
        },
        _ = engine => {
            tracing::warn!("Command queue stopped");
            Ok(())
        }
    };

    queue.shutdown();
    gateway.shutdown().await;
    outcome
}

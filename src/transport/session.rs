// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! One open connection to the bus interface.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::error::ProtocolError;

use super::LinkConfig;

/// Read buffer size.
const READ_CHUNK: usize = 1024;

/// Channel depth between the session's I/O workers and the supervisor.
const SESSION_CHANNEL: usize = 64;

/// An open link.
///
/// `inbound` closes when the connection is lost; sends on `outbound` fail
/// once the writer has stopped.
#[derive(Debug)]
pub(crate) struct Session {
    pub(crate) inbound: mpsc::Receiver<Vec<u8>>,
    pub(crate) outbound: mpsc::Sender<Vec<u8>>,
}

/// Opens the link described by `config`.
pub(crate) async fn open(config: &LinkConfig) -> Result<Session, ProtocolError> {
    match config {
        LinkConfig::Tcp { addr } => open_tcp(addr).await,
        LinkConfig::Serial { path, baud } => {
            let path = path.to_string_lossy().into_owned();
            let baud = *baud;
            tokio::task::spawn_blocking(move || open_serial(&path, baud))
                .await
                .map_err(|e| ProtocolError::ConnectionFailed(e.to_string()))?
        }
    }
}

async fn open_tcp(addr: &str) -> Result<Session, ProtocolError> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    let (mut reader, mut writer) = stream.into_split();

    let (inbound_tx, inbound) = mpsc::channel(SESSION_CHANNEL);
    let (outbound, mut outbound_rx) = mpsc::channel::<Vec<u8>>(SESSION_CHANNEL);

    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => {
                    tracing::debug!("Bus interface closed the connection");
                    break;
                }
                Ok(n) => {
                    if inbound_tx.send(buf[..n].to_vec()).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Read from bus interface failed");
                    break;
                }
            }
        }
    });

    tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if let Err(e) = writer.write_all(&frame).await {
                tracing::warn!(error = %e, "Write to bus interface failed");
                break;
            }
        }
    });

    Ok(Session { inbound, outbound })
}

#[cfg(feature = "serial")]
fn open_serial(path: &str, baud: u32) -> Result<Session, ProtocolError> {
    use std::io::{ErrorKind, Read, Write};
    use std::time::Duration;

    let mut reader = serialport::new(path, baud)
        .data_bits(serialport::DataBits::Eight)
        .stop_bits(serialport::StopBits::One)
        .parity(serialport::Parity::None)
        .timeout(Duration::from_millis(100))
        .open()?;
    let mut writer = reader.try_clone()?;

    let (inbound_tx, inbound) = mpsc::channel(SESSION_CHANNEL);
    let (outbound, mut outbound_rx) = mpsc::channel::<Vec<u8>>(SESSION_CHANNEL);

    // serialport is blocking, so each direction gets its own thread.
    std::thread::Builder::new()
        .name("cbus-serial-rx".to_string())
        .spawn(move || {
            let mut buf = vec![0u8; READ_CHUNK];
            while !inbound_tx.is_closed() {
                match reader.read(&mut buf) {
                    Ok(0) => {}
                    Ok(n) => {
                        if inbound_tx.blocking_send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(ref e) if e.kind() == ErrorKind::TimedOut => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "Read from serial port failed");
                        break;
                    }
                }
            }
        })?;

    std::thread::Builder::new()
        .name("cbus-serial-tx".to_string())
        .spawn(move || {
            while let Some(frame) = outbound_rx.blocking_recv() {
                if let Err(e) = writer.write_all(&frame).and_then(|()| writer.flush()) {
                    tracing::warn!(error = %e, "Write to serial port failed");
                    break;
                }
            }
        })?;

    Ok(Session { inbound, outbound })
}

#[cfg(not(feature = "serial"))]
fn open_serial(path: &str, _baud: u32) -> Result<Session, ProtocolError> {
    Err(ProtocolError::ConnectionFailed(format!(
        "cannot open {path}: built without serial support"
    )))
}

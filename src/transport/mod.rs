// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Byte-stream link to the bus interface.
//!
//! The link is a TCP socket (CNI or a serial-to-network bridge) or a local
//! serial port (PCI). Either way the rest of the bridge only sees
//! [`LinkEvent`]s coming in and frames going out through channels; the
//! [`LinkSupervisor`] opens the link, re-opens it after failures and
//! sends the codec handshake every time it comes up.

mod session;
mod supervisor;

pub use supervisor::LinkSupervisor;

use std::fmt;
use std::path::PathBuf;

use crate::error::ConfigError;

/// Baud rate of the C-Bus PC Interface.
pub const DEFAULT_BAUD: u32 = 9600;

/// What the transport reports to the command queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The link is open and the handshake has been sent.
    Connected,
    /// The link was lost.
    Disconnected,
    /// Bytes read from the link.
    Data(Vec<u8>),
}

/// How to reach the bus interface.
///
/// # Examples
///
/// ```
/// use cbus_bridge::transport::LinkConfig;
///
/// let link = LinkConfig::tcp("192.0.2.10:10001");
/// assert!(link.validate().is_ok());
///
/// assert!(LinkConfig::tcp("192.0.2.10").validate().is_err());
/// assert!(LinkConfig::serial("/dev/does-not-exist").validate().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkConfig {
    /// TCP connection, `host:port`.
    Tcp {
        /// Address to connect to.
        addr: String,
    },
    /// Local serial port.
    Serial {
        /// Device node, e.g. `/dev/ttyUSB0`.
        path: PathBuf,
        /// Baud rate.
        baud: u32,
    },
}

impl LinkConfig {
    /// Creates a TCP link configuration.
    #[must_use]
    pub fn tcp(addr: impl Into<String>) -> Self {
        Self::Tcp { addr: addr.into() }
    }

    /// Creates a serial link configuration at the PCI's 9600 baud.
    #[must_use]
    pub fn serial(path: impl Into<PathBuf>) -> Self {
        Self::Serial {
            path: path.into(),
            baud: DEFAULT_BAUD,
        }
    }

    /// Checks the configuration before any connection attempt.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::DeviceNotFound` if the serial device node does
    /// not exist, or `ConfigError::InvalidLinkAddress` if a TCP address is
    /// not `host:port`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::Tcp { addr } => {
                let valid = addr
                    .rsplit_once(':')
                    .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
                if valid {
                    Ok(())
                } else {
                    Err(ConfigError::InvalidLinkAddress(addr.clone()))
                }
            }
            Self::Serial { path, .. } => {
                if path.exists() {
                    Ok(())
                } else {
                    Err(ConfigError::DeviceNotFound(path.clone()))
                }
            }
        }
    }
}

impl fmt::Display for LinkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { addr } => write!(f, "tcp://{addr}"),
            Self::Serial { path, baud } => write!(f, "{}@{baud}", path.display()),
        }
    }
}

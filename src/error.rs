// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the C-Bus bridge.
//!
//! This module provides the error hierarchy used across the crate: value
//! validation, link and broker communication, frame and payload parsing,
//! and startup configuration.
//!
//! Runtime dispatch problems (unmatched confirmations, exhausted retries,
//! supersession) are not errors in this sense. They are reported as
//! [`CommandOutcome`](crate::event::CommandOutcome) events or logged, and
//! never stop the daemon.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Error occurred during value validation.
    #[error("value error: {0}")]
    Value(#[from] ValueError),

    /// Error occurred on the bus link or the MQTT broker connection.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Error occurred while parsing a frame, topic or payload.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Startup configuration is invalid.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The command queue task has stopped.
    #[error("command queue is not running")]
    QueueClosed,
}

/// Errors related to value validation and constraints.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValueError {
    /// A numeric value is outside the allowed range.
    #[error("value {actual} is out of range [{min}, {max}]")]
    OutOfRange {
        /// Minimum allowed value.
        min: i64,
        /// Maximum allowed value.
        max: i64,
        /// The actual value that was provided.
        actual: i64,
    },

    /// A value could not be read as a number.
    #[error("not a number: {0:?}")]
    NotANumber(String),

    /// An unknown device kind name was provided.
    #[error("invalid device kind: {0}")]
    InvalidDeviceKind(String),

    /// An invalid on/off state string was provided.
    #[error("invalid switch state: {0}")]
    InvalidSwitchState(String),
}

/// Errors related to the bus link and the MQTT broker.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// MQTT client request failed.
    #[cfg(feature = "mqtt")]
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// Serial port could not be opened or used.
    #[cfg(feature = "serial")]
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Socket or device I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Connection to the interface or broker failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The bus link is down.
    #[error("link is down")]
    LinkDown,

    /// Internal channel was closed.
    #[error("channel closed: {0}")]
    ChannelClosed(String),
}

/// Errors related to parsing inbound frames and MQTT messages.
#[derive(Debug, Error)]
pub enum ParseError {
    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Topic is not one of the bridge's command topics.
    #[error("invalid topic: {0}")]
    InvalidTopic(String),

    /// Inbound bytes do not form a valid frame.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Frame checksum did not verify.
    #[error("checksum mismatch: frame sums to {sum:#04x}, expected 0x00")]
    Checksum {
        /// The byte sum of the frame, including its checksum byte.
        sum: u8,
    },

    /// Failed to parse a specific value.
    #[error("failed to parse {field}: {message}")]
    InvalidValue {
        /// The field that failed to parse.
        field: String,
        /// Description of the parsing failure.
        message: String,
    },
}

/// Errors in startup configuration. These are fatal and reported before
/// any command is dispatched.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The serial device node does not exist.
    #[error("serial device {} does not exist", .0.display())]
    DeviceNotFound(PathBuf),

    /// A TCP link address is not `host:port`.
    #[error("invalid link address {0:?}, expected HOST:PORT")]
    InvalidLinkAddress(String),

    /// Client certificate and key must be supplied together.
    #[error("client certificate and key must both be specified")]
    IncompleteClientAuth,

    /// A file named in the configuration could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Unreadable {
        /// The file that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The broker credentials file does not contain a username and password.
    #[error("credentials file {} must contain a username and a password line", .0.display())]
    InvalidCredentials(PathBuf),
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_error_display() {
        let err = ValueError::OutOfRange {
            min: 0,
            max: 255,
            actual: 300,
        };
        assert_eq!(err.to_string(), "value 300 is out of range [0, 255]");
    }

    #[test]
    fn error_from_value_error() {
        let value_err = ValueError::InvalidDeviceKind("lamp".to_string());
        let err: Error = value_err.into();
        assert!(matches!(err, Error::Value(ValueError::InvalidDeviceKind(_))));
    }

    #[test]
    fn checksum_error_display() {
        let err = ParseError::Checksum { sum: 0x12 };
        assert_eq!(
            err.to_string(),
            "checksum mismatch: frame sums to 0x12, expected 0x00"
        );
    }

    #[test]
    fn config_error_display() {
        let err = ConfigError::DeviceNotFound(PathBuf::from("/dev/ttyUSB9"));
        assert_eq!(err.to_string(), "serial device /dev/ttyUSB9 does not exist");
    }
}

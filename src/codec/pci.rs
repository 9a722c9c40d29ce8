// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! C-Bus PC Interface codec.
//!
//! Commands are sent in "smart" mode as a backslash, the hex-encoded packet
//! with its checksum, a confirmation code character and a carriage return:
//!
//! ```text
//! \053800790545h<CR>      lighting on, group 5, confirmation code 'h'
//! ```
//!
//! The interface answers with the confirmation character followed by `.`
//! when it accepted the command. Traffic from other units is monitored as
//! CR/LF-terminated hex lines.

use std::time::Duration;

use crate::codec::{Confirmation, Decoded, FrameCodec, MatchKey, StatusReport};
use crate::command::{Action, LogicalCommand};
use crate::error::ParseError;
use crate::types::{GroupAddress, Level, RampRate};

/// Confirmation codes used for commands, in rotation order.
///
/// `g` is left out of the rotation, it tags handshake frames.
const CONFIRMATION_CODES: &[u8] = b"hijklmnopqrstuvwxyz";

/// Code used for handshake frames.
const HANDSHAKE_CODE: u8 = b'g';

/// Point-to-multipoint header.
const HEADER_POINT_TO_MULTIPOINT: u8 = 0x05;

/// Lighting application address.
const APP_LIGHTING: u8 = 0x38;

const SAL_ON: u8 = 0x79;
const SAL_OFF: u8 = 0x01;
const SAL_TERMINATE_RAMP: u8 = 0x09;

/// Longest inbound line kept while waiting for its terminator.
const MAX_LINE: usize = 512;

/// Codec for the C-Bus PCI and CNI serial protocol.
///
/// # Examples
///
/// ```
/// use cbus_bridge::codec::{Decoded, FrameCodec, PciCodec};
///
/// let codec = PciCodec::new();
/// let mut buffer = b"h.".to_vec();
/// let frame = codec.next_frame(&mut buffer).unwrap();
/// assert!(matches!(codec.decode(&frame), Ok(Decoded::Confirmation(c)) if c.accepted));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct PciCodec;

impl PciCodec {
    /// Creates a PCI codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn token_for(nonce: u64) -> u8 {
        // Safe: the modulus keeps the index below the table length
        #[allow(clippy::cast_possible_truncation)]
        let index = (nonce % CONFIRMATION_CODES.len() as u64) as usize;
        CONFIRMATION_CODES[index]
    }

    fn sal(action: Action, address: GroupAddress) -> Vec<u8> {
        let ga = address.value();
        match action {
            Action::On => vec![SAL_ON, ga],
            Action::Off => vec![SAL_OFF, ga],
            Action::SetLevel(level) => vec![RampRate::INSTANT.code(), ga, level.value()],
            Action::Ramp { level, duration } => {
                let rate = RampRate::from_duration(duration).unwrap_or(RampRate::SLOWEST);
                vec![rate.code(), ga, level.value()]
            }
        }
    }
}

/// Two's complement of the byte sum.
fn checksum(bytes: &[u8]) -> u8 {
    let sum = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    0u8.wrapping_sub(sum)
}

fn confirmation_status(byte: u8) -> Option<bool> {
    match byte {
        b'.' => Some(true),
        b'#' | b'$' | b'%' | b'\'' => Some(false),
        _ => None,
    }
}

fn is_code(byte: u8) -> bool {
    byte == HANDSHAKE_CODE || CONFIRMATION_CODES.contains(&byte)
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect()
}

fn hex_decode(text: &str) -> Result<Vec<u8>, ParseError> {
    if text.len() % 2 != 0 {
        return Err(ParseError::MalformedFrame(format!(
            "odd number of hex digits in {text:?}"
        )));
    }
    (0..text.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&text[i..i + 2], 16)
                .map_err(|_| ParseError::MalformedFrame(format!("invalid hex in {text:?}")))
        })
        .collect()
}

fn parse_lighting_sal(
    sal: &[u8],
    source: u8,
) -> Result<Vec<StatusReport>, ParseError> {
    let truncated = || ParseError::MalformedFrame("truncated lighting SAL".to_string());
    let mut reports = Vec::new();
    let mut rest = sal;

    while let Some(&command) = rest.first() {
        match command {
            SAL_ON | SAL_OFF => {
                let ga = *rest.get(1).ok_or_else(truncated)?;
                let level = if command == SAL_ON {
                    Level::FULL
                } else {
                    Level::OFF
                };
                reports.push(StatusReport {
                    address: GroupAddress::new(ga),
                    level,
                    transition: Duration::ZERO,
                    source: Some(source),
                });
                rest = &rest[2..];
            }
            SAL_TERMINATE_RAMP => {
                // The final level of a terminated ramp is not on the wire.
                rest.get(1).ok_or_else(truncated)?;
                rest = &rest[2..];
            }
            code => {
                let Some(rate) = RampRate::from_code(code) else {
                    tracing::trace!(command = code, "Unknown lighting SAL command");
                    break;
                };
                let (ga, level) = match rest {
                    [_, ga, level, ..] => (*ga, *level),
                    _ => return Err(truncated()),
                };
                reports.push(StatusReport {
                    address: GroupAddress::new(ga),
                    level: Level::new(level),
                    transition: rate.duration(),
                    source: Some(source),
                });
                rest = &rest[3..];
            }
        }
    }

    Ok(reports)
}

impl FrameCodec for PciCodec {
    fn encode(&self, command: &LogicalCommand, nonce: u64) -> Vec<u8> {
        let mut packet = vec![HEADER_POINT_TO_MULTIPOINT, APP_LIGHTING, 0x00];
        packet.extend(Self::sal(command.action(), command.address()));
        packet.push(checksum(&packet));

        let mut frame = Vec::with_capacity(packet.len() * 2 + 3);
        frame.push(b'\\');
        frame.extend(hex_encode(&packet).into_bytes());
        frame.push(Self::token_for(nonce));
        frame.push(b'\r');
        frame
    }

    fn match_key(&self, command: &LogicalCommand, nonce: u64) -> MatchKey {
        MatchKey::new(
            command.address(),
            command.action().class(),
            Self::token_for(nonce),
        )
    }

    fn next_frame(&self, buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
        let Some(start) = buffer.iter().position(|b| !matches!(b, b'\r' | b'\n')) else {
            buffer.clear();
            return None;
        };
        buffer.drain(..start);

        if let [code, status, ..] = buffer.as_slice()
            && is_code(*code)
            && confirmation_status(*status).is_some()
        {
            return Some(buffer.drain(..2).collect());
        }

        match buffer.iter().position(|b| matches!(b, b'\r' | b'\n')) {
            Some(end) => Some(buffer.drain(..end).collect()),
            None if buffer.len() > MAX_LINE => Some(std::mem::take(buffer)),
            None => None,
        }
    }

    fn decode(&self, frame: &[u8]) -> Result<Decoded, ParseError> {
        if let [code, status] = frame
            && is_code(*code)
            && let Some(accepted) = confirmation_status(*status)
        {
            return Ok(Decoded::Confirmation(Confirmation::token_only(
                *code, accepted,
            )));
        }

        let text = std::str::from_utf8(frame)
            .map_err(|_| ParseError::MalformedFrame("frame is not ASCII".to_string()))?
            .trim();

        // Single characters are interface notices (power up, buffer full).
        if text.len() <= 1 {
            return Ok(Decoded::Unrecognized);
        }

        let bytes = hex_decode(text)?;
        let sum = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        if sum != 0 {
            return Err(ParseError::Checksum { sum });
        }

        let body = &bytes[..bytes.len() - 1];
        let [header, source, application, _routing, sal @ ..] = body else {
            return Err(ParseError::MalformedFrame(format!(
                "packet too short: {text:?}"
            )));
        };
        if *header != HEADER_POINT_TO_MULTIPOINT || *application != APP_LIGHTING {
            return Ok(Decoded::Unrecognized);
        }

        let reports = parse_lighting_sal(sal, *source)?;
        if reports.is_empty() {
            Ok(Decoded::Unrecognized)
        } else {
            Ok(Decoded::Status(reports))
        }
    }

    fn supports_native_ramp(&self, duration: Duration) -> bool {
        RampRate::from_duration(duration).is_some()
    }

    fn handshake(&self) -> Vec<Vec<u8>> {
        let option = |text: &str| {
            let mut frame = text.as_bytes().to_vec();
            frame.push(HANDSHAKE_CODE);
            frame.push(b'\r');
            frame
        };
        vec![
            // Reset
            b"~~~\r".to_vec(),
            // Application address 1: lighting
            option("A3210038"),
            // Interface options #3: local SAL
            option("A3420002"),
            // Interface options #1: connect, source check, smart mode, monitor
            option("A3300059"),
        ]
    }
}
